//! # Imagery HTTP
//!
//! `imagery_http` exposes resumable image uploads over HTTP. Two protocols are served side by
//! side for every owning resource:
//!
//! * an explicit part protocol (initiate, append parts, complete, status) under
//!   `/{resource}/{id}/uploads`
//! * tus 1.0.0 with the `creation` extension under `/{resource}/{id}/uploads/tus`
//!
//! Both are thin translations onto [`imagery_core::Uploads`], so they share buffering, integrity
//! checks and image linking.
//!
//! ## Example `main.rs`
//!
//! ```rust,ignore
//! use std::sync::Arc;
//!
//! use imagery_core::memory::MemoryMetadata;
//! use imagery_core::{DefaultKeyStrategy, StaticOwnerResolver, UploadSettings, Uploads};
//! use imagery_http::Imagery;
//! use imagery_objectstore::Memory;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let metadata = Arc::new(MemoryMetadata::new());
//!     let uploads = Uploads::new(
//!         metadata.clone(),
//!         metadata,
//!         Arc::new(Memory::new(5 * 1024 * 1024)),
//!         Arc::new(DefaultKeyStrategy::default()),
//!         UploadSettings::default(),
//!     )?;
//!     let imagery = Imagery::new(uploads, Arc::new(StaticOwnerResolver::new(["users"])));
//!
//!     axum::Server::bind(&"0.0.0.0:13030".parse()?)
//!         .serve(imagery.router()?.into_make_service())
//!         .await?;
//!
//!     Ok(())
//! }
//! ```
use std::collections::HashMap;
use std::sync::Arc;

use axum::extract::{DefaultBodyLimit, Path, State};
use axum::http::header::{self, HeaderMap};
use axum::http::Request;
use axum::middleware::{self, Next};
use axum::response::Response;
use axum::Router;
use tower_http::set_header::SetResponseHeaderLayer;
use tower_http::trace::{self, TraceLayer};

mod errors;
pub(crate) use errors::Error;
pub(crate) use errors::Result;

pub mod headers;
mod tus;
mod uploads;

use imagery_core::{OpenGate, OwnerRef, OwnerResolver, UploadAction, UploadGate, Uploads};

#[cfg(test)]
mod tests;

// Room for multipart boundaries and the partIndex field around the largest accepted chunk.
const MULTIPART_OVERHEAD: usize = 16 * 1024;

/// Resolves the `:resource` and `:id` path parameters into an [`OwnerRef`] and adds it to the
/// request extensions. Unknown resource kinds and missing owners are rejected with 404 before any
/// handler runs.
pub async fn resolve_owner<B>(
    State(imagery): State<Imagery>,
    Path(path_params): Path<HashMap<String, String>>,
    mut req: Request<B>,
    next: Next<B>,
) -> Result<Response> {
    let kind = path_params
        .get("resource")
        .ok_or(Error::MissingPathParameter("resource"))?;
    let id = path_params
        .get("id")
        .ok_or(Error::MissingPathParameter("id"))?;

    let owner = imagery.owners.resolve(kind, id).await?;
    req.extensions_mut().insert(owner);

    Ok(next.run(req).await)
}

/// Shared state behind every upload route.
#[derive(Clone)]
pub struct Imagery {
    uploads: Uploads,
    owners: Arc<dyn OwnerResolver>,
    gate: Arc<dyn UploadGate>,
}

impl Imagery {
    /// Serve `uploads` for owners known to `owners`, allowing every request.
    pub fn new(uploads: Uploads, owners: Arc<dyn OwnerResolver>) -> Self {
        Self {
            uploads,
            owners,
            gate: Arc::new(OpenGate),
        }
    }

    /// Replace the default allow-all gate.
    pub fn with_gate(mut self, gate: Arc<dyn UploadGate>) -> Self {
        self.gate = gate;
        self
    }

    pub(crate) async fn authorize(
        &self,
        owner: &OwnerRef,
        action: UploadAction,
        headers: &HeaderMap,
    ) -> Result<()> {
        let credentials = headers
            .get(header::AUTHORIZATION)
            .and_then(|v| v.to_str().ok());
        Ok(self.gate.authorize(owner, action, credentials).await?)
    }

    /// Return an [`axum::Router`] serving both upload protocols.
    pub fn router(&self) -> Result<axum::Router> {
        let tus = tus::router()
            .route_layer(middleware::from_fn(tus::require_tus_resumable))
            .layer(SetResponseHeaderLayer::overriding(
                headers::TUS_RESUMABLE.clone(),
                headers::TUS_RESUMABLE_VERSION.clone(),
            ));

        let settings = self.uploads.settings();
        let body_limit = usize::try_from(settings.max_chunk_size.max(settings.flush_threshold))
            .unwrap_or(usize::MAX)
            .saturating_add(MULTIPART_OVERHEAD);

        let app = Router::new()
            .merge(uploads::router())
            .merge(tus)
            .route_layer(middleware::from_fn_with_state(self.clone(), resolve_owner))
            .layer(DefaultBodyLimit::max(body_limit))
            .layer(
                TraceLayer::new_for_http()
                    .make_span_with(trace::DefaultMakeSpan::new().include_headers(true))
                    .on_response(trace::DefaultOnResponse::new())
                    .on_request(trace::DefaultOnRequest::new()),
            )
            .with_state(self.clone());

        Ok(app)
    }
}
