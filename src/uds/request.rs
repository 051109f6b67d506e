//! Index requests carried through the pipeline (spec §4.7).

use crate::error::CoreError;
use crate::uds::record::RecordName;

/// What a request asks the index to do with `name`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestKind {
    /// Add `name` only if it is not already present.
    Post,
    /// Add `name`, or replace its metadata if already present.
    Update,
    /// Look up `name`; may update its recency in the volume index.
    Query,
    /// Look up `name` without updating recency.
    QueryNoUpdate,
    /// Remove `name` from the index.
    Delete,
}

/// The outcome delivered to a request's callback.
pub struct RequestOutcome {
    /// `Err` if the request failed at any pipeline stage.
    pub status: Result<(), CoreError>,
    /// `true` if `name` was already present in the index.
    pub found: bool,
    /// The metadata `name` held before this request, if it was found and
    /// the request kind may have replaced it.
    pub old_metadata: Option<[u8; 16]>,
}

/// One in-flight request. Stages mutate fields and may short-circuit
/// straight to [`Request::complete`] on error (spec §4.7 "Failure
/// propagation").
pub struct Request {
    /// The fingerprint this request concerns.
    pub name: RecordName,
    /// Metadata to store, for `POST`/`UPDATE`.
    pub new_metadata: Option<[u8; 16]>,
    /// What kind of operation this is.
    pub kind: RequestKind,
    /// The zone this request was triaged onto, once computed.
    pub zone: Option<usize>,
    callback: Option<Box<dyn FnOnce(RequestOutcome) + Send>>,
}

impl Request {
    /// Creates a request of `kind` for `name`, to be delivered to
    /// `callback` once a pipeline stage completes it.
    pub fn new(
        name: RecordName,
        kind: RequestKind,
        new_metadata: Option<[u8; 16]>,
        callback: impl FnOnce(RequestOutcome) + Send + 'static,
    ) -> Self {
        Self {
            name,
            new_metadata,
            kind,
            zone: None,
            callback: Some(Box::new(callback)),
        }
    }

    /// Invokes the callback with `outcome`, consuming the request. Safe
    /// to call exactly once; later stages in the pipeline never see this
    /// request again once it has been completed.
    pub fn complete(mut self, outcome: RequestOutcome) {
        if let Some(callback) = self.callback.take() {
            callback(outcome);
        }
    }
}
