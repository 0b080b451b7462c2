//! Transaction signing. The gateway signs every transfer itself from the
//! master account's keys — there is no meta-transaction relay of
//! externally-presigned actions.

use near_crypto::{PublicKey, Signer};
use near_primitives::hash::CryptoHash;
use near_primitives::transaction::{Action, SignedTransaction, Transaction, TransactionV0};
use near_primitives::types::{AccountId, Nonce};

/// Sign a transaction with an in-memory Ed25519 signer.
pub fn sign_transaction(
    signer: &Signer,
    nonce: Nonce,
    receiver_id: &AccountId,
    block_hash: CryptoHash,
    actions: Vec<Action>,
) -> SignedTransaction {
    Transaction::V0(TransactionV0 {
        signer_id: signer.get_account_id().clone(),
        public_key: signer.public_key(),
        nonce,
        receiver_id: receiver_id.clone(),
        block_hash,
        actions,
    })
    .sign(signer)
}

/// Parse a `ed25519:<base58>`-formatted secret key into a signer for the
/// given account.
pub fn signer_from_secret(
    account_id: AccountId,
    secret_key_str: &str,
) -> Result<Signer, crate::GatewayError> {
    let secret_key: near_crypto::SecretKey = secret_key_str
        .parse()
        .map_err(|_| crate::GatewayError::Config("invalid secret key format".into()))?;
    Ok(near_crypto::InMemorySigner::from_secret_key(account_id, secret_key))
}

pub fn public_key_of(signer: &Signer) -> PublicKey {
    signer.public_key()
}

#[cfg(test)]
mod tests {
    use super::*;
    use near_crypto::{KeyType, SecretKey};

    #[test]
    fn signer_from_secret_round_trips_public_key() {
        let sk = SecretKey::from_random(KeyType::ED25519);
        let signer = near_crypto::InMemorySigner::from_secret_key("a.testnet".parse().unwrap(), sk.clone());
        assert_eq!(signer.public_key(), sk.public_key());
    }

    #[test]
    fn sign_transaction_produces_matching_signer_id() {
        let sk = SecretKey::from_random(KeyType::ED25519);
        let signer = near_crypto::InMemorySigner::from_secret_key("a.testnet".parse().unwrap(), sk);
        let tx = sign_transaction(
            &signer,
            1,
            &"b.testnet".parse().unwrap(),
            CryptoHash::default(),
            vec![],
        );
        assert_eq!(tx.transaction.signer_id().to_string(), "a.testnet");
    }
}
