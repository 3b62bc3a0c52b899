pub mod errors;
pub use errors::{Error, ErrorKind, Result};

mod content_hash;
pub use content_hash::{ContentHash, Digester};

mod content_type;
pub use content_type::ImageContentType;

mod image;
pub use image::{ImageLink, ImageObject};

mod key;
pub use key::{DefaultKeyStrategy, KeyStrategy};

mod owner;
pub use owner::{
    OpenGate, OwnerRef, OwnerResolver, ResourceDefinition, StaticOwnerResolver, UploadAction,
    UploadGate,
};

mod session;
pub use session::{UploadProtocol, UploadSession, UploadStatus};

mod settings;
pub use settings::UploadSettings;

mod stream;
pub use stream::ChunkedBody;

pub mod memory;
pub mod registry;

mod finalize;
mod tus;
pub use tus::{TusCreate, TusProgress};

mod uploads;
pub use uploads::{CompletedUpload, Uploads};
