//! Authentication session manager, OAuth configuration, and credential models.

pub mod callback;
pub mod config;
pub mod credential;
pub mod scope;
pub mod session;

pub use callback::*;
pub use config::*;
pub use credential::*;
pub use scope::*;
pub use session::*;

// self
use crate::_prelude::*;

/// Future returned by [`CredentialProvider::credential`].
pub type CredentialFuture<'a> = Pin<Box<dyn Future<Output = Result<Credential>> + 'a + Send>>;

/// Source of bearer credentials for admitted calls.
///
/// The scheduler only ever borrows a credential for the duration of one attempt; ownership and
/// mutation stay with the implementor.
pub trait CredentialProvider
where
	Self: Send + Sync,
{
	/// Returns a credential valid for at least the configured refresh margin.
	fn credential(&self) -> CredentialFuture<'_>;

	/// Signals that the remote server refused the current credential.
	///
	/// Implementations should force a refresh on the next [`credential`](Self::credential) call.
	fn invalidate(&self) {}
}
