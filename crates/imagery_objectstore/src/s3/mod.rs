use async_trait::async_trait;
use aws_credential_types::provider::{ProvideCredentials, SharedCredentialsProvider};
use aws_credential_types::Credentials;
use aws_sdk_s3::config::Region;
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::types::{CompletedMultipartUpload, CompletedPart};
use aws_sdk_s3::Client;
use bytes::Bytes;
use futures::stream::StreamExt;
use http::Uri;
use serde::Deserialize;

pub(crate) mod logging;
use logging::LoggingInterceptor;

use crate::errors::{Error, Result};
use crate::{Chunk, Key, ObjectBody, ObjectStore};

/// S3 rejects any non-final multipart part smaller than 5 MiB.
pub const S3_MIN_PART_SIZE: u64 = 5 * 1024 * 1024;

fn default_scheme() -> String {
    String::from("https")
}

#[derive(Clone, Debug, Deserialize)]
pub struct S3Config {
    secret_key: String,
    access_key: String,
    hostname: String,
    bucket_name: String,
    region: String,
    #[serde(default = "default_scheme")]
    scheme: String,
}

impl S3Config {
    pub async fn new_objects(&self) -> Result<S3> {
        let scp = SharedCredentialsProvider::new(
            Credentials::new(
                self.access_key.clone(),
                self.secret_key.clone(),
                None,
                None,
                "imagery",
            )
            .provide_credentials()
            .await?,
        );

        let uri = Uri::builder()
            .scheme(self.scheme.as_str())
            .authority(self.hostname.as_str())
            .path_and_query("/")
            .build()?;

        let sdk_config = aws_config::load_from_env().await;

        let config = aws_sdk_s3::config::Builder::from(&sdk_config)
            .region(Region::new(self.region.clone()))
            .credentials_provider(scp)
            .endpoint_url(uri.to_string())
            .force_path_style(true)
            .interceptor(LoggingInterceptor)
            .build();

        let s3_client = aws_sdk_s3::Client::from_conf(config);

        tracing::info!(bucket = %self.bucket_name, endpoint = %uri, "configured s3 object store");

        Ok(S3 {
            bucket_name: self.bucket_name.clone(),
            client: s3_client,
        })
    }
}

#[derive(Clone)]
pub struct S3 {
    bucket_name: String,
    client: Client,
}

#[async_trait]
impl ObjectStore for S3 {
    fn min_part_size(&self) -> u64 {
        S3_MIN_PART_SIZE
    }

    async fn get(&self, key: &Key) -> Result<ObjectBody> {
        let get_object_output = self
            .client
            .get_object()
            .key(key.to_string())
            .bucket(&self.bucket_name)
            .send()
            .await?;

        let body = futures::stream::try_unfold(get_object_output.body, |mut body| async move {
            match body.next().await {
                Some(Ok(bytes)) => Ok(Some((bytes, body))),
                Some(Err(e)) => Err(Error::from(e)),
                None => Ok(None),
            }
        });
        Ok(body.boxed())
    }

    async fn initiate_chunked_upload(&self, key: &Key) -> Result<String> {
        let create_multipart_upload_output = self
            .client
            .create_multipart_upload()
            .key(key.to_string())
            .bucket(&self.bucket_name)
            .send()
            .await?;

        create_multipart_upload_output
            .upload_id
            .ok_or(Error::ObjectsFailedToInitiateChunkedUpload(
                "missing upload id",
            ))
    }

    async fn upload_chunk(
        &self,
        upload_id: &str,
        key: &Key,
        chunk_number: i32,
        body: Bytes,
    ) -> Result<Chunk> {
        let content_length = body.len() as i64;
        let upload_part_output = self
            .client
            .upload_part()
            .upload_id(upload_id)
            .part_number(chunk_number)
            .key(key.to_string())
            .body(ByteStream::from(body))
            .content_length(content_length)
            .bucket(&self.bucket_name)
            .send()
            .await?;

        Ok(Chunk {
            e_tag: upload_part_output.e_tag,
            chunk_number,
        })
    }

    async fn finalize_chunked_upload(
        &self,
        upload_id: &str,
        key: &Key,
        mut chunks: Vec<Chunk>,
    ) -> Result<()> {
        chunks.sort_by_key(|c| c.chunk_number);

        let mut mpu = CompletedMultipartUpload::builder();
        for chunk in chunks {
            let mut pb = CompletedPart::builder();
            if let Some(e_tag) = &chunk.e_tag {
                pb = pb.e_tag(e_tag);
            }
            mpu = mpu.parts(pb.part_number(chunk.chunk_number).build());
        }
        let _complete_multipart_upload_output = self
            .client
            .complete_multipart_upload()
            .multipart_upload(mpu.build())
            .upload_id(upload_id)
            .key(key.to_string())
            .bucket(&self.bucket_name)
            .send()
            .await?;

        Ok(())
    }

    async fn abort_chunked_upload(&self, upload_id: &str, key: &Key) -> Result<()> {
        let _abort_multipart_upload_output = self
            .client
            .abort_multipart_upload()
            .upload_id(upload_id)
            .key(key.to_string())
            .bucket(&self.bucket_name)
            .send()
            .await?;

        Ok(())
    }

    async fn delete(&self, key: &Key) -> Result<()> {
        let _delete_object_output = self
            .client
            .delete_object()
            .key(key.to_string())
            .bucket(&self.bucket_name)
            .send()
            .await?;

        Ok(())
    }
}
