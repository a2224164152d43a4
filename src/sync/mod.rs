//! Opportunistic cloud sync
//!
//! The remote is an opaque row store (insert/select/delete) that needs a
//! signed-in identity for writes. No identity simply means "local only".

mod reconciler;
pub mod remote;
mod rest;

pub use reconciler::{SyncOutcome, SyncReconciler};
pub use remote::{
    Filter, Identity, IdentityProvider, Order, RemoteError, RemoteLink, RemotePlanSummary,
    RemoteStore, StaticIdentity,
};
pub use rest::RestRemoteStore;
