use serde::{Deserialize, Serialize};

use super::*;

#[derive(PartialEq, Eq, Debug, Serialize, Deserialize, Clone)]
pub struct EventCountResponse {
    pub count: u64,
}
#[derive(PartialEq, Eq, Debug, Serialize, Deserialize, Clone)]
pub struct OwnerResponse {
    pub owner: Address,
}
/// One relay result: the clear value sealed to the session public key.
#[derive(PartialEq, Eq, Debug, Serialize, Deserialize, Clone)]
pub struct SealedEntry {
    pub handle: Handle,
    pub sealed: String,
}
#[derive(PartialEq, Eq, Debug, Serialize, Deserialize, Clone)]
#[serde(rename_all = "camelCase")]
pub struct UserDecryptResponse {
    /// Fresh relay key the entries were sealed with, hex encoded.
    pub relay_public_key: String,
    pub entries: Vec<SealedEntry>,
}
