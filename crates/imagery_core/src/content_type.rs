use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// The fixed set of image media types accepted for upload.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum ImageContentType {
    Png,
    Jpeg,
    Gif,
    Webp,
    Tiff,
    Bmp,
    Heic,
}

impl ImageContentType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Png => "image/png",
            Self::Jpeg => "image/jpeg",
            Self::Gif => "image/gif",
            Self::Webp => "image/webp",
            Self::Tiff => "image/tiff",
            Self::Bmp => "image/bmp",
            Self::Heic => "image/heic",
        }
    }

    /// File extension used when deriving storage keys.
    pub fn extension(&self) -> &'static str {
        match self {
            Self::Png => "png",
            Self::Jpeg => "jpg",
            Self::Gif => "gif",
            Self::Webp => "webp",
            Self::Tiff => "tiff",
            Self::Bmp => "bmp",
            Self::Heic => "heic",
        }
    }
}

impl TryFrom<&str> for ImageContentType {
    type Error = Error;

    fn try_from(s: &str) -> Result<Self> {
        // media type parameters (eg `; charset=...`) carry no meaning for images
        let essence = s.split(';').next().unwrap_or_default().trim();
        match essence.to_ascii_lowercase().as_str() {
            "image/png" => Ok(Self::Png),
            "image/jpeg" | "image/jpg" => Ok(Self::Jpeg),
            "image/gif" => Ok(Self::Gif),
            "image/webp" => Ok(Self::Webp),
            "image/tiff" => Ok(Self::Tiff),
            "image/bmp" => Ok(Self::Bmp),
            "image/heic" => Ok(Self::Heic),
            _ => Err(Error::InvalidArgument(format!(
                "unsupported content type: {s:?}"
            ))),
        }
    }
}

impl TryFrom<String> for ImageContentType {
    type Error = Error;

    fn try_from(s: String) -> Result<Self> {
        s.as_str().try_into()
    }
}

impl From<ImageContentType> for String {
    fn from(t: ImageContentType) -> String {
        t.as_str().to_string()
    }
}

impl std::fmt::Display for ImageContentType {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod test {
    use rstest::*;

    use super::*;

    #[rstest]
    #[case::png("image/png", Some(ImageContentType::Png))]
    #[case::jpg_alias("image/jpg", Some(ImageContentType::Jpeg))]
    #[case::mixed_case("Image/WebP", Some(ImageContentType::Webp))]
    #[case::params("image/gif; foo=bar", Some(ImageContentType::Gif))]
    #[case::svg("image/svg+xml", None)]
    #[case::pdf("application/pdf", None)]
    #[case::empty("", None)]
    fn parse(#[case] input: &str, #[case] expected: Option<ImageContentType>) {
        let actual = ImageContentType::try_from(input).ok();
        assert_eq!(expected, actual);
    }
}
