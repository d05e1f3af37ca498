//! Token counting using tiktoken.
//!
//! Prompts are measured with the same byte-pair encoding the target model
//! uses. The legacy completion models this crate targets use `r50k_base`
//! (the "gpt2" vocabulary), which is the default; newer encodings are
//! selectable for compatible servers.
//!
//! If an encoder fails to load, counts fall back to the UTF-8 byte length,
//! which never undercounts.

use std::fmt;
use std::str::FromStr;
use std::sync::OnceLock;

use thiserror::Error;
use tiktoken_rs::{CoreBPE, cl100k_base, o200k_base, p50k_base, r50k_base};

/// Anything that can measure a prompt in model tokens.
///
/// The builder depends on this rather than on tiktoken directly so tests can
/// use a predictable tokenizer.
pub trait CountTokens: Send + Sync {
    fn count(&self, text: &str) -> u32;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Encoding {
    /// GPT-2 / GPT-3 vocabulary.
    #[default]
    R50kBase,
    P50kBase,
    Cl100kBase,
    O200kBase,
}

impl Encoding {
    pub const ALL: [Self; 4] = [
        Self::R50kBase,
        Self::P50kBase,
        Self::Cl100kBase,
        Self::O200kBase,
    ];

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::R50kBase => "r50k_base",
            Self::P50kBase => "p50k_base",
            Self::Cl100kBase => "cl100k_base",
            Self::O200kBase => "o200k_base",
        }
    }
}

impl fmt::Display for Encoding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Error)]
#[error("unknown token encoding `{0}` (expected r50k_base, p50k_base, cl100k_base or o200k_base)")]
pub struct UnknownEncoding(pub String);

impl FromStr for Encoding {
    type Err = UnknownEncoding;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "r50k_base" | "r50k" | "gpt2" => Ok(Self::R50kBase),
            "p50k_base" | "p50k" => Ok(Self::P50kBase),
            "cl100k_base" | "cl100k" => Ok(Self::Cl100kBase),
            "o200k_base" | "o200k" => Ok(Self::O200kBase),
            _ => Err(UnknownEncoding(s.to_string())),
        }
    }
}

// Vocabulary loading is expensive; each encoder is built at most once per process.
static R50K: OnceLock<Option<CoreBPE>> = OnceLock::new();
static P50K: OnceLock<Option<CoreBPE>> = OnceLock::new();
static CL100K: OnceLock<Option<CoreBPE>> = OnceLock::new();
static O200K: OnceLock<Option<CoreBPE>> = OnceLock::new();

fn get_encoder(encoding: Encoding) -> Option<&'static CoreBPE> {
    match encoding {
        Encoding::R50kBase => R50K.get_or_init(|| r50k_base().ok()),
        Encoding::P50kBase => P50K.get_or_init(|| p50k_base().ok()),
        Encoding::Cl100kBase => CL100K.get_or_init(|| cl100k_base().ok()),
        Encoding::O200kBase => O200K.get_or_init(|| o200k_base().ok()),
    }
    .as_ref()
}

/// Thread-safe tiktoken counter sharing a process-wide encoder.
///
/// ```
/// use threadline_context::{CountTokens, Encoding, TokenCounter};
///
/// let counter = TokenCounter::new(Encoding::R50kBase);
/// assert!(counter.count("Hello, world!") > 0);
/// ```
#[derive(Clone, Copy)]
pub struct TokenCounter {
    encoding: Encoding,
    encoder: Option<&'static CoreBPE>,
}

impl fmt::Debug for TokenCounter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokenCounter")
            .field("encoding", &self.encoding)
            .field("encoder", &self.encoder.map(|_| "<CoreBPE>"))
            .finish()
    }
}

impl Default for TokenCounter {
    fn default() -> Self {
        Self::new(Encoding::default())
    }
}

impl TokenCounter {
    #[must_use]
    pub fn new(encoding: Encoding) -> Self {
        let encoder = get_encoder(encoding);
        if encoder.is_none() {
            tracing::error!(
                %encoding,
                "Failed to initialize tiktoken encoder. Falling back to byte-length estimates."
            );
        }

        Self { encoding, encoder }
    }

    #[must_use]
    pub fn encoding(&self) -> Encoding {
        self.encoding
    }
}

impl CountTokens for TokenCounter {
    fn count(&self, text: &str) -> u32 {
        let len = match self.encoder {
            Some(encoder) => encoder.encode_ordinary(text).len(),
            None => text.len(),
        };

        u32::try_from(len).unwrap_or(u32::MAX)
    }
}
