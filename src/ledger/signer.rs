//! 签名器：记录签名与所有权校验
//!
//! 账本只依赖 Signer trait；默认实现为 secp256k1 Schnorr（BIP-340），身份即 x-only 公钥的十六进制。
//! 签名对象是签名输入的 SHA-256 摘要。

use secp256k1::{schnorr, All, Keypair, Message, Secp256k1, SecretKey, XOnlyPublicKey, SECP256K1};
use sha2::{Digest, Sha256};

use crate::ledger::LedgerError;

/// 与单一智能体身份绑定的签名器
pub trait Signer: Send + Sync {
    /// 智能体身份（公钥十六进制）
    fn identity(&self) -> &str;

    /// 对任意字节签名，返回十六进制签名
    fn sign(&self, message: &[u8]) -> Result<String, LedgerError>;
}

/// secp256k1 Schnorr 签名器
pub struct SchnorrSigner {
    keypair: Keypair,
    identity: String,
}

impl SchnorrSigner {
    pub fn from_secret_bytes(secret: &[u8]) -> Result<Self, LedgerError> {
        let sk = SecretKey::from_slice(secret).map_err(|e| LedgerError::Signing(e.to_string()))?;
        let keypair = Keypair::from_secret_key(global_context(), &sk);
        let (xonly, _parity) = keypair.x_only_public_key();
        Ok(Self {
            keypair,
            identity: hex::encode(xonly.serialize()),
        })
    }

    /// 从十六进制私钥创建（允许 0x 前缀）
    pub fn from_hex(secret_hex: &str) -> Result<Self, LedgerError> {
        let trimmed = secret_hex.trim().trim_start_matches("0x");
        let bytes = hex::decode(trimmed)
            .map_err(|e| LedgerError::Signing(format!("invalid secret key hex: {}", e)))?;
        Self::from_secret_bytes(&bytes)
    }
}

impl std::fmt::Debug for SchnorrSigner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SchnorrSigner")
            .field("identity", &self.identity)
            .finish_non_exhaustive()
    }
}

impl Signer for SchnorrSigner {
    fn identity(&self) -> &str {
        &self.identity
    }

    fn sign(&self, message: &[u8]) -> Result<String, LedgerError> {
        let msg = Message::from_digest(message_digest(message));
        let sig = global_context().sign_schnorr_no_aux_rand(&msg, &self.keypair);
        Ok(hex::encode(sig.serialize()))
    }
}

/// 进程级共享上下文
fn global_context() -> &'static Secp256k1<All> {
    SECP256K1
}

fn message_digest(message: &[u8]) -> [u8; 32] {
    Sha256::digest(message).into()
}

/// 校验签名是否由 identity 对应的私钥产生；任何解析失败都视为不通过
pub fn verify_signature(identity: &str, message: &[u8], signature: &str) -> bool {
    let Ok(pubkey_bytes) = hex::decode(identity) else {
        return false;
    };
    let Ok(pubkey) = XOnlyPublicKey::from_slice(&pubkey_bytes) else {
        return false;
    };
    let Ok(sig_bytes) = hex::decode(signature) else {
        return false;
    };
    let Ok(sig) = schnorr::Signature::from_slice(&sig_bytes) else {
        return false;
    };
    let msg = Message::from_digest(message_digest(message));
    global_context().verify_schnorr(&sig, &msg, &pubkey).is_ok()
}
