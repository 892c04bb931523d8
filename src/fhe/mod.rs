use anyhow::Result;
use async_trait::async_trait;

use crate::api::{Address, ClearValue, EncryptedInput};

mod instance;
mod mock;
mod remote;

pub use instance::*;
pub use mock::MockCoprocessor;
pub use remote::DevnetBackend;

/// The encryption side of the FHE collaborator.
///
/// Given ordered clear values and the (contract, user) pair they are meant
/// for, produces one handle per value in the same order plus a single proof
/// binding all of them to that pair.
#[async_trait]
pub trait FheBackend: Send + Sync {
    async fn encrypt(
        &self,
        contract: Address,
        user: Address,
        values: &[ClearValue],
    ) -> Result<EncryptedInput>;
}
