use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[derive(serde::Deserialize, serde::Serialize)]
pub enum Transformation {
    #[serde(rename = "plain")]
    Plain,
    S256,
}

impl Default for Transformation {
    fn default() -> Self {
        Self::Plain
    }
}

impl Transformation {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Plain => "plain",
            Self::S256 => "S256",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "plain" => Some(Self::Plain),
            "S256" => Some(Self::S256),
            _ => None,
        }
    }

    pub fn apply(&self, verifier: &str) -> String {
        match self {
            Self::Plain => verifier.to_string(),
            Self::S256 => URL_SAFE_NO_PAD.encode(Sha256::digest(verifier.as_bytes())),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
#[derive(serde::Deserialize, serde::Serialize)]
pub struct Challenge {
    #[serde(rename = "code_challenge")]
    pub code: String,
    #[serde(rename = "code_challenge_method")]
    #[serde(default)]
    pub method: Transformation,
}

impl Challenge {
    pub fn s256(verifier: &str) -> Self {
        Self {
            code: Transformation::S256.apply(verifier),
            method: Transformation::S256,
        }
    }
}

#[derive(Debug, Clone)]
#[derive(serde::Deserialize)]
pub struct Verifier {
    #[serde(rename = "code_verifier")]
    pub value: String,
}

impl Verifier {
    pub fn new(value: impl Into<String>) -> Self {
        Self {
            value: value.into(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PkceFailure {
    MissingVerifier,
    Mismatch,
}

pub fn verify(challenge: &Challenge, verifier: Option<&Verifier>) -> Result<(), PkceFailure> {
    let verifier = verifier.ok_or(PkceFailure::MissingVerifier)?;
    let computed = challenge.method.apply(&verifier.value);

    if computed.as_bytes().ct_eq(challenge.code.as_bytes()).into() {
        Ok(())
    } else {
        Err(PkceFailure::Mismatch)
    }
}
