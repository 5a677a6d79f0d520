//! Safe (Gnosis Safe) multisig primitives.
//!
//! Pure functions only: the EIP-712 transaction hash is computed locally,
//! signatures are normalized and concatenated in ascending owner order,
//! and owner-management calls are ABI-encoded here. Network reads and
//! broadcasts live in the multisig use case.

use std::collections::BTreeMap;

use alloy::primitives::{Address, B256, Bytes, U256, address};
use alloy::sol;
use alloy::sol_types::{SolCall, SolStruct, eip712_domain};
use serde::{Deserialize, Serialize};

/// Head of the Safe owner linked list.
pub const SENTINEL_OWNERS: Address = address!("0000000000000000000000000000000000000001");

/// Length of an ECDSA signature in the Safe `signatures` blob.
pub const SIGNATURE_LEN: usize = 65;

sol! {
    /// EIP-712 struct signed by Safe owners.
    #[derive(Debug)]
    struct SafeTx {
        address to;
        uint256 value;
        bytes data;
        uint8 operation;
        uint256 safeTxGas;
        uint256 baseGas;
        uint256 gasPrice;
        address gasToken;
        address refundReceiver;
        uint256 nonce;
    }

    #[allow(missing_docs)]
    #[allow(clippy::too_many_arguments)]
    #[derive(Debug)]
    interface ISafe {
        function nonce() external view returns (uint256 nonce);
        function getOwners() external view returns (address[] memory owners);
        function getThreshold() external view returns (uint256 threshold);
        function getTransactionHash(
            address to,
            uint256 value,
            bytes calldata data,
            uint8 operation,
            uint256 safeTxGas,
            uint256 baseGas,
            uint256 gasPrice,
            address gasToken,
            address refundReceiver,
            uint256 _nonce
        ) external view returns (bytes32 txHash);
        function execTransaction(
            address to,
            uint256 value,
            bytes calldata data,
            uint8 operation,
            uint256 safeTxGas,
            uint256 baseGas,
            uint256 gasPrice,
            address gasToken,
            address refundReceiver,
            bytes memory signatures
        ) external payable returns (bool success);
        function addOwnerWithThreshold(address owner, uint256 _threshold) external;
        function removeOwner(address prevOwner, address owner, uint256 _threshold) external;
        function changeThreshold(uint256 _threshold) external;
    }
}

/// Safe operation type. Only plain calls are produced here.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(u8)]
pub enum Operation {
    Call = 0,
    DelegateCall = 1,
}

/// Owners, threshold and nonce of a Safe as last read from chain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SafeDetails {
    /// Owners in on-chain linked-list order.
    pub owners: Vec<Address>,
    pub threshold: u64,
    pub nonce: u64,
}

impl SafeDetails {
    pub fn is_owner(&self, address: &Address) -> bool {
        self.owners.contains(address)
    }

    /// Decode the three batched read results (`nonce`, `getOwners`,
    /// `getThreshold`, in that order).
    pub fn decode(
        nonce: &[u8],
        owners: &[u8],
        threshold: &[u8],
    ) -> Result<Self, alloy::sol_types::Error> {
        let nonce = ISafe::nonceCall::abi_decode_returns(nonce, true)?.nonce;
        let owners = ISafe::getOwnersCall::abi_decode_returns(owners, true)?.owners;
        let threshold = ISafe::getThresholdCall::abi_decode_returns(threshold, true)?.threshold;

        Ok(Self {
            owners,
            threshold: threshold.saturating_to::<u64>(),
            nonce: nonce.saturating_to::<u64>(),
        })
    }
}

/// Calldata for the three reads that make up `SafeDetails`.
pub fn details_calls() -> [Bytes; 3] {
    [
        ISafe::nonceCall {}.abi_encode().into(),
        ISafe::getOwnersCall {}.abi_encode().into(),
        ISafe::getThresholdCall {}.abi_encode().into(),
    ]
}

/// The user-level call wrapped by a Safe transaction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SafeCall {
    pub to: Address,
    pub value: U256,
    pub data: Bytes,
}

impl SafeCall {
    fn to_sol(&self, nonce: u64) -> SafeTx {
        SafeTx {
            to: self.to,
            value: self.value,
            data: self.data.clone(),
            operation: Operation::Call as u8,
            safeTxGas: U256::ZERO,
            baseGas: U256::ZERO,
            gasPrice: U256::ZERO,
            gasToken: Address::ZERO,
            refundReceiver: Address::ZERO,
            nonce: U256::from(nonce),
        }
    }
}

/// EIP-712 hash of a Safe transaction (domain: chain id + Safe address).
pub fn safe_tx_hash(chain_id: u64, safe: Address, call: &SafeCall, nonce: u64) -> B256 {
    let domain = eip712_domain! {
        chain_id: chain_id,
        verifying_contract: safe,
    };
    call.to_sol(nonce).eip712_signing_hash(&domain)
}

/// Bring a 65-byte `r ‖ s ‖ v` signature to the Safe ECDSA convention
/// (`v ∈ {27, 28}`).
pub fn normalize_signature(mut signature: [u8; SIGNATURE_LEN]) -> Bytes {
    if signature[64] < 27 {
        signature[64] += 27;
    }
    Bytes::copy_from_slice(&signature)
}

/// Keep signatures from current owners and order them by owner address,
/// lowest first. The contract rejects any other order.
pub fn ordered_owner_signatures(
    signatures: &BTreeMap<Address, Bytes>,
    owners: &[Address],
) -> Vec<(Address, Bytes)> {
    let mut valid: Vec<(Address, Bytes)> = signatures
        .iter()
        .filter(|(signer, _)| owners.contains(signer))
        .map(|(signer, sig)| (*signer, sig.clone()))
        .collect();
    valid.sort_by(|a, b| a.0.as_slice().cmp(b.0.as_slice()));
    valid
}

/// Concatenate ordered signatures into the `signatures` argument.
pub fn concat_signatures(ordered: &[(Address, Bytes)]) -> Bytes {
    let mut blob = Vec::with_capacity(ordered.len() * SIGNATURE_LEN);
    for (_, sig) in ordered {
        blob.extend_from_slice(sig);
    }
    blob.into()
}

/// Predecessor of `owner` in the owner linked list, `SENTINEL_OWNERS` for
/// the first owner, `None` if `owner` is not listed.
pub fn prev_owner(owners: &[Address], owner: &Address) -> Option<Address> {
    let index = owners.iter().position(|o| o == owner)?;
    Some(if index == 0 {
        SENTINEL_OWNERS
    } else {
        owners[index - 1]
    })
}

/// `execTransaction` calldata for a call with its collected signatures.
pub fn encode_exec_transaction(call: &SafeCall, signatures: Bytes) -> Bytes {
    ISafe::execTransactionCall {
        to: call.to,
        value: call.value,
        data: call.data.clone(),
        operation: Operation::Call as u8,
        safeTxGas: U256::ZERO,
        baseGas: U256::ZERO,
        gasPrice: U256::ZERO,
        gasToken: Address::ZERO,
        refundReceiver: Address::ZERO,
        signatures,
    }
    .abi_encode()
    .into()
}

pub fn encode_add_owner(owner: Address, threshold: u64) -> Bytes {
    ISafe::addOwnerWithThresholdCall {
        owner,
        _threshold: U256::from(threshold),
    }
    .abi_encode()
    .into()
}

pub fn encode_remove_owner(prev_owner: Address, owner: Address, threshold: u64) -> Bytes {
    ISafe::removeOwnerCall {
        prevOwner: prev_owner,
        owner,
        _threshold: U256::from(threshold),
    }
    .abi_encode()
    .into()
}

pub fn encode_change_threshold(threshold: u64) -> Bytes {
    ISafe::changeThresholdCall {
        _threshold: U256::from(threshold),
    }
    .abi_encode()
    .into()
}

/// A Safe transaction collecting signatures until quorum.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PendingSafeTransaction {
    pub id: String,
    pub safe: Address,
    pub chain_id: u64,
    pub to: Address,
    pub value: U256,
    pub data: Bytes,
    pub nonce: u64,
    pub safe_tx_hash: B256,
    /// Owner → 65-byte signature.
    pub signatures: BTreeMap<Address, Bytes>,
    pub summary: String,
    /// Creation time (Unix ms).
    pub created_at: u64,
}

impl PendingSafeTransaction {
    pub fn call(&self) -> SafeCall {
        SafeCall {
            to: self.to,
            value: self.value,
            data: self.data.clone(),
        }
    }
}
