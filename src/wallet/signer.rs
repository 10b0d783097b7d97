//! Wallet signing using alloy
//!
//! Covers the three signing duties of an account: deriving its address,
//! signing the SIWE login message (EIP-191), and signing exchange orders
//! (EIP-712 against the Opinion CTF Exchange domain on BSC).

use alloy::primitives::{keccak256, Address, B256, U256};
use alloy::signers::local::PrivateKeySigner;
use alloy::signers::{Signer, SignerSync};
use anyhow::{Context, Result};

/// BSC chain id used across login and order signing
pub const CHAIN_ID: u64 = 56;

const EXCHANGE_NAME: &str = "OPINION CTF Exchange";
const EXCHANGE_VERSION: &str = "1";
const EXCHANGE_CONTRACT: &str = "0x5f45344126d6488025b0b84a3a8189f2487a7246";

// Type hashes per EIP-712
const DOMAIN_TYPE: &[u8] =
    b"EIP712Domain(string name,string version,uint256 chainId,address verifyingContract)";
const ORDER_TYPE: &[u8] = b"Order(uint256 salt,address maker,address signer,address taker,\
uint256 tokenId,uint256 makerAmount,uint256 takerAmount,uint256 expiration,uint256 nonce,\
uint256 feeRateBps,uint8 side,uint8 signatureType)";

/// Fields of an order that vary per submission. The constant members (taker,
/// expiration, nonce, fee, signature type) are filled in at hashing time.
#[derive(Debug, Clone)]
pub struct OrderParams {
    pub salt: U256,
    /// The account's exchange-side proxy wallet
    pub maker: Address,
    pub token_id: U256,
    /// 1e18-scaled amount the maker gives up
    pub maker_amount: U256,
    /// 1e18-scaled amount the maker receives
    pub taker_amount: U256,
    /// 0 = buy, 1 = sell
    pub side: u8,
}

/// A wallet bound to one decrypted private key
pub struct Wallet {
    signer: PrivateKeySigner,
    /// Checksummed address string
    pub address: String,
}

impl Wallet {
    pub fn new(private_key: &str) -> Result<Self> {
        let signer: PrivateKeySigner = private_key
            .parse()
            .context("Failed to parse private key")?;
        let signer = signer.with_chain_id(Some(CHAIN_ID));
        let address = signer.address().to_string();

        Ok(Self { signer, address })
    }

    /// EOA address as an alloy type, for the order `signer` field
    pub fn eoa(&self) -> Address {
        self.signer.address()
    }

    /// Sign a plain text message with the EIP-191 personal prefix
    pub fn sign_text(&self, text: &str) -> Result<String> {
        let signature = self
            .signer
            .sign_message_sync(text.as_bytes())
            .context("Failed to sign message")?;
        Ok(format!("0x{}", hex::encode(signature.as_bytes())))
    }

    /// Sign an exchange order against the Opinion CTF Exchange EIP-712 domain
    pub fn sign_order(&self, params: &OrderParams) -> Result<String> {
        let struct_hash = order_struct_hash(params, self.signer.address());
        let domain_separator = domain_separator()?;

        // EIP-712 signing hash: keccak256("\x19\x01" ++ domainSeparator ++ structHash)
        let mut signing_input = Vec::with_capacity(66);
        signing_input.push(0x19);
        signing_input.push(0x01);
        signing_input.extend_from_slice(domain_separator.as_slice());
        signing_input.extend_from_slice(struct_hash.as_slice());
        let signing_hash = keccak256(&signing_input);

        // Sign the hash directly, no prefix
        let signature = self
            .signer
            .sign_hash_sync(&signing_hash)
            .context("Failed to sign order")?;
        Ok(format!("0x{}", hex::encode(signature.as_bytes())))
    }
}

/// Derive the wallet address for a raw private key (used at store creation)
pub fn address_from_private_key(private_key: &str) -> Result<String> {
    let signer: PrivateKeySigner = private_key
        .parse()
        .context("Failed to parse private key")?;
    Ok(signer.address().to_string())
}

/// Domain separator: keccak256(abi.encode(typeHash, nameHash, versionHash,
/// chainId, verifyingContract))
fn domain_separator() -> Result<B256> {
    let contract: Address = EXCHANGE_CONTRACT
        .parse()
        .context("Invalid exchange contract address")?;

    let mut data = Vec::with_capacity(160);
    data.extend_from_slice(keccak256(DOMAIN_TYPE).as_slice());
    data.extend_from_slice(keccak256(EXCHANGE_NAME.as_bytes()).as_slice());
    data.extend_from_slice(keccak256(EXCHANGE_VERSION.as_bytes()).as_slice());
    data.extend_from_slice(&U256::from(CHAIN_ID).to_be_bytes::<32>());
    data.extend_from_slice(&pad_address(contract));
    Ok(keccak256(&data))
}

/// Struct hash: keccak256(abi.encode(typeHash, ...order fields as words))
fn order_struct_hash(params: &OrderParams, signer: Address) -> B256 {
    let mut data = Vec::with_capacity(13 * 32);
    data.extend_from_slice(keccak256(ORDER_TYPE).as_slice());
    data.extend_from_slice(&params.salt.to_be_bytes::<32>());
    data.extend_from_slice(&pad_address(params.maker));
    data.extend_from_slice(&pad_address(signer));
    data.extend_from_slice(&pad_address(Address::ZERO)); // taker: open order
    data.extend_from_slice(&params.token_id.to_be_bytes::<32>());
    data.extend_from_slice(&params.maker_amount.to_be_bytes::<32>());
    data.extend_from_slice(&params.taker_amount.to_be_bytes::<32>());
    data.extend_from_slice(&U256::ZERO.to_be_bytes::<32>()); // expiration
    data.extend_from_slice(&U256::ZERO.to_be_bytes::<32>()); // nonce
    data.extend_from_slice(&U256::ZERO.to_be_bytes::<32>()); // feeRateBps
    data.extend_from_slice(&U256::from(params.side).to_be_bytes::<32>());
    data.extend_from_slice(&U256::from(2u8).to_be_bytes::<32>()); // signatureType: proxy
    keccak256(&data)
}

fn pad_address(address: Address) -> [u8; 32] {
    let mut padded = [0u8; 32];
    padded[12..].copy_from_slice(address.as_slice());
    padded
}

#[cfg(test)]
mod tests {
    use super::*;

    // Well-known test vector: private key 0x...01
    const TEST_KEY: &str = "0x0000000000000000000000000000000000000000000000000000000000000001";

    #[test]
    fn test_address_derivation() {
        let address = address_from_private_key(TEST_KEY).unwrap();
        assert_eq!(address, "0x7E5F4552091A69125d5DfCb7b8C2659029395Bdf");

        let wallet = Wallet::new(TEST_KEY).unwrap();
        assert_eq!(wallet.address, address);
    }

    #[test]
    fn test_sign_text_shape() {
        let wallet = Wallet::new(TEST_KEY).unwrap();
        let signature = wallet.sign_text("hello").unwrap();

        // 0x + 65 bytes of r||s||v
        assert!(signature.starts_with("0x"));
        assert_eq!(signature.len(), 132);
    }

    #[test]
    fn test_sign_order_deterministic() {
        let wallet = Wallet::new(TEST_KEY).unwrap();
        let params = OrderParams {
            salt: U256::from(12345u64),
            maker: Address::ZERO,
            token_id: U256::from(7u64),
            maker_amount: U256::from(1_000_000_000_000_000_000u128),
            taker_amount: U256::from(2_000_000_000_000_000_000u128),
            side: 0,
        };

        // RFC 6979 signing: identical input, identical signature
        let a = wallet.sign_order(&params).unwrap();
        let b = wallet.sign_order(&params).unwrap();
        assert_eq!(a, b);
        assert_eq!(a.len(), 132);
    }

    #[test]
    fn test_order_hash_covers_every_field() {
        let wallet = Wallet::new(TEST_KEY).unwrap();
        let params = OrderParams {
            salt: U256::from(1u64),
            maker: Address::ZERO,
            token_id: U256::from(7u64),
            maker_amount: U256::from(100u64),
            taker_amount: U256::from(200u64),
            side: 0,
        };
        let base = wallet.sign_order(&params).unwrap();

        let mut flipped = params.clone();
        flipped.side = 1;
        assert_ne!(wallet.sign_order(&flipped).unwrap(), base);

        let mut resalted = params.clone();
        resalted.salt = U256::from(2u64);
        assert_ne!(wallet.sign_order(&resalted).unwrap(), base);
    }

    #[test]
    fn test_invalid_key_rejected() {
        assert!(Wallet::new("not-a-key").is_err());
        assert!(address_from_private_key("0x1234").is_err());
    }
}
