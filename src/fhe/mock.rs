use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};

use anyhow::{anyhow, bail, ensure, Result};
use async_trait::async_trait;

use super::FheBackend;
use crate::api::*;

const BINDING_DOMAIN: &[u8] = b"shadowbet.input-proof.v1";

/// In-process stand-in for the FHE coprocessor, its ACL and the KMS.
///
/// Values behind handles are kept in the clear; the ledger only ever touches
/// them through the handle operations below, so code written against it
/// behaves the way it would against real ciphertexts.
#[derive(Debug, Default, Clone)]
pub struct MockCoprocessor {
    state: Arc<Mutex<CoprocessorState>>,
}
#[derive(Debug, Default)]
struct CoprocessorState {
    values: HashMap<Handle, ClearValue>,
    acl: HashMap<Handle, HashSet<Address>>,
    public: HashSet<Handle>,
    used_proofs: HashSet<[u8; 32]>,
    nonce: u64,
}
impl CoprocessorState {
    fn insert(&mut self, domain: &[u8], value: ClearValue) -> Handle {
        self.nonce += 1;
        let mut preimage = domain.to_vec();
        preimage.extend_from_slice(&self.nonce.to_be_bytes());
        let handle = Handle::from_digest(keccak256(&preimage), value.fhe_type());
        self.values.insert(handle, value);
        handle
    }
    fn value(&self, handle: &Handle) -> Result<ClearValue> {
        self.values
            .get(handle)
            .copied()
            .ok_or(anyhow!("unknown handle {}", handle))
    }
}

fn binding_digest(contract: &Address, user: &Address, handles: &[Handle]) -> [u8; 32] {
    let mut preimage = BINDING_DOMAIN.to_vec();
    preimage.extend_from_slice(&contract.0);
    preimage.extend_from_slice(&user.0);
    for handle in handles {
        preimage.extend_from_slice(&handle.0);
    }
    keccak256(&preimage)
}

/// Proof layout: handle count, the handles in order, then the binding digest.
fn parse_proof(proof: &InputProof) -> Result<(Vec<Handle>, [u8; 32])> {
    let bytes = &proof.0;
    ensure!(!bytes.is_empty(), "empty input proof");
    let count = bytes[0] as usize;
    ensure!(
        bytes.len() == 1 + count * 32 + 32,
        "input proof has length {} but declares {} handles",
        bytes.len(),
        count
    );
    let mut handles = vec![];
    for i in 0..count {
        let mut handle = [0u8; 32];
        handle.copy_from_slice(&bytes[1 + i * 32..1 + (i + 1) * 32]);
        handles.push(Handle(handle));
    }
    let mut digest = [0u8; 32];
    digest.copy_from_slice(&bytes[1 + count * 32..]);
    Ok((handles, digest))
}

fn same_type(a: &ClearValue, b: &ClearValue) -> Result<()> {
    ensure!(
        a.fhe_type() == b.fhe_type(),
        "operand types differ: {} and {}",
        a.fhe_type(),
        b.fhe_type()
    );
    Ok(())
}

impl MockCoprocessor {
    fn state(&self) -> MutexGuard<'_, CoprocessorState> {
        self.state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
    pub fn encrypt_input(
        &self,
        contract: Address,
        user: Address,
        values: &[ClearValue],
    ) -> Result<EncryptedInput> {
        ensure!(!values.is_empty(), "nothing to encrypt");
        ensure!(values.len() <= u8::MAX as usize, "too many values in one input");
        let mut state = self.state();
        let mut domain = b"input".to_vec();
        domain.extend_from_slice(&contract.0);
        domain.extend_from_slice(&user.0);
        let handles = values
            .iter()
            .map(|value| state.insert(&domain, *value))
            .collect::<Vec<Handle>>();
        let mut proof = vec![handles.len() as u8];
        for handle in &handles {
            proof.extend_from_slice(&handle.0);
        }
        proof.extend_from_slice(&binding_digest(&contract, &user, &handles));
        Ok(EncryptedInput {
            handles,
            input_proof: InputProof(proof),
        })
    }
    /// Checks that `inputs` are exactly the proof's handles, in order and of
    /// the expected types, bound to (contract, user), then burns the proof.
    pub fn verify_input(
        &self,
        proof: &InputProof,
        contract: Address,
        user: Address,
        inputs: &[(Handle, FheType)],
    ) -> Result<()> {
        let (handles, digest) = parse_proof(proof)?;
        ensure!(
            digest == binding_digest(&contract, &user, &handles),
            "input proof is not bound to contract {} and user {}",
            contract,
            user
        );
        ensure!(
            handles.len() == inputs.len(),
            "input proof covers {} handles but {} were submitted",
            handles.len(),
            inputs.len()
        );
        let mut state = self.state();
        for (i, (handle, fhe_type)) in inputs.iter().enumerate() {
            ensure!(handles[i] == *handle, "handle {} is not at position {} of the proof", handle, i);
            let value = state.value(handle)?;
            ensure!(
                value.fhe_type() == *fhe_type,
                "handle {} is {} but {} was expected",
                handle,
                value.fhe_type(),
                fhe_type
            );
        }
        if !state.used_proofs.insert(digest) {
            bail!("input proof was already used");
        }
        Ok(())
    }
    pub fn trivial_encrypt(&self, value: ClearValue) -> Handle {
        self.state().insert(b"trivial", value)
    }
    fn binary(
        &self,
        a: &Handle,
        b: &Handle,
        op: impl Fn(ClearValue, ClearValue) -> Result<ClearValue>,
    ) -> Result<Handle> {
        let mut state = self.state();
        let result = op(state.value(a)?, state.value(b)?)?;
        Ok(state.insert(b"op", result))
    }
    /// Wrapping addition, like the coprocessor's.
    pub fn add(&self, a: &Handle, b: &Handle) -> Result<Handle> {
        self.binary(a, b, |a, b| {
            same_type(&a, &b)?;
            let sum = a.as_u64().wrapping_add(b.as_u64());
            Ok(ClearValue::from_u64(a.fhe_type(), sum))
        })
    }
    /// Wrapping multiplication, like the coprocessor's. A product that must
    /// not wrap is checked with `mul_overflows`.
    pub fn mul(&self, a: &Handle, b: &Handle) -> Result<Handle> {
        self.binary(a, b, |a, b| {
            same_type(&a, &b)?;
            let product = a.as_u64().wrapping_mul(b.as_u64());
            Ok(ClearValue::from_u64(a.fhe_type(), product))
        })
    }
    /// Encrypted flag, true when `a * b` does not fit the operand type.
    pub fn mul_overflows(&self, a: &Handle, b: &Handle) -> Result<Handle> {
        self.binary(a, b, |a, b| {
            same_type(&a, &b)?;
            let max = match a.fhe_type() {
                FheType::Bool => 1,
                FheType::U32 => u32::MAX as u128,
                FheType::U64 => u64::MAX as u128,
            };
            let product = a.as_u64() as u128 * b.as_u64() as u128;
            Ok(ClearValue::Bool(product > max))
        })
    }
    pub fn le(&self, a: &Handle, b: &Handle) -> Result<Handle> {
        self.binary(a, b, |a, b| {
            same_type(&a, &b)?;
            Ok(ClearValue::Bool(a.as_u64() <= b.as_u64()))
        })
    }
    pub fn eq(&self, a: &Handle, b: &Handle) -> Result<Handle> {
        self.binary(a, b, |a, b| {
            same_type(&a, &b)?;
            Ok(ClearValue::Bool(a == b))
        })
    }
    pub fn select(&self, condition: &Handle, a: &Handle, b: &Handle) -> Result<Handle> {
        let mut state = self.state();
        let condition = match state.value(condition)? {
            ClearValue::Bool(condition) => condition,
            other => bail!("select condition must be ebool but is {}", other.fhe_type()),
        };
        let (a, b) = (state.value(a)?, state.value(b)?);
        same_type(&a, &b)?;
        Ok(state.insert(b"select", if condition { a } else { b }))
    }
    pub fn cast(&self, a: &Handle, to: FheType) -> Result<Handle> {
        let mut state = self.state();
        let value = state.value(a)?;
        Ok(state.insert(b"cast", ClearValue::from_u64(to, value.as_u64())))
    }

    pub fn allow(&self, handle: &Handle, account: Address) {
        self.state().acl.entry(*handle).or_default().insert(account);
    }
    pub fn is_allowed(&self, handle: &Handle, account: &Address) -> bool {
        self.state()
            .acl
            .get(handle)
            .map(|accounts| accounts.contains(account))
            .unwrap_or(false)
    }
    pub fn make_publicly_decryptable(&self, handle: &Handle) {
        self.state().public.insert(*handle);
    }
    /// Aggregate decryption, only for handles the ledger published.
    pub fn public_decrypt(&self, handle: &Handle) -> Result<ClearValue> {
        let state = self.state();
        ensure!(
            state.public.contains(handle),
            "handle {} is not publicly decryptable",
            handle
        );
        state.value(handle)
    }
    /// Key management side of a user decryption. The caller enforces the ACL.
    pub fn kms_decrypt(&self, handle: &Handle) -> Option<ClearValue> {
        self.state().values.get(handle).copied()
    }
}

#[async_trait]
impl FheBackend for MockCoprocessor {
    async fn encrypt(
        &self,
        contract: Address,
        user: Address,
        values: &[ClearValue],
    ) -> Result<EncryptedInput> {
        self.encrypt_input(contract, user, values)
    }
}
