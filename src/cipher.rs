//! Boundary of the block-cipher layer some formats are wrapped in.
//!
//! The cipher itself is supplied by the caller. This module only splits the buffer
//! according to the [`CipherMode`], checks block alignment and drives the cipher block by
//! block. Both the whole buffer and any clear prefix must be block aligned. Alignment is
//! checked before any block is touched, and buffers are never padded.

use thiserror::Error;

pub const BLOCK_SIZE: usize = 8;

/// A keyed 64-bit block cipher.
pub trait BlockCipher {
    fn encrypt_block(&self, block: &mut [u8; BLOCK_SIZE]);
    fn decrypt_block(&self, block: &mut [u8; BLOCK_SIZE]);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CipherMode {
    /// The whole buffer is encrypted.
    Standard,
    /// The first `prefix_len` bytes (a timestamp header) are stored in the clear.
    /// `prefix_len` must be a multiple of [`BLOCK_SIZE`].
    Savegame { prefix_len: usize },
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum CipherError {
    #[error("ciphertext of {len} bytes is not a multiple of the {block_size}-byte block size")]
    MisalignedCiphertext { len: usize, block_size: usize },

    #[error("plaintext of {len} bytes is not a multiple of the {block_size}-byte block size")]
    MisalignedPlaintext { len: usize, block_size: usize },

    #[error("buffer of {len} bytes is shorter than its {prefix_len}-byte clear prefix")]
    PrefixTooLong { prefix_len: usize, len: usize },

    #[error("clear prefix of {prefix_len} bytes is not a multiple of the {block_size}-byte block size")]
    MisalignedPrefix { prefix_len: usize, block_size: usize },
}

pub struct CipherEnvelope<C> {
    cipher: C,
    mode: CipherMode,
}

impl<C: BlockCipher> CipherEnvelope<C> {
    pub fn new(cipher: C, mode: CipherMode) -> Self {
        CipherEnvelope { cipher, mode }
    }

    pub fn mode(&self) -> CipherMode {
        self.mode
    }

    /// Length of the clear prefix of an already block-aligned buffer of `len` bytes.
    fn prefix_len(&self, len: usize) -> Result<usize, CipherError> {
        let prefix_len = match self.mode {
            CipherMode::Standard => return Ok(0),
            CipherMode::Savegame { prefix_len } => prefix_len,
        };
        if prefix_len % BLOCK_SIZE != 0 {
            return Err(CipherError::MisalignedPrefix {
                prefix_len,
                block_size: BLOCK_SIZE,
            });
        }
        if prefix_len > len {
            return Err(CipherError::PrefixTooLong { prefix_len, len });
        }
        Ok(prefix_len)
    }

    /// Validate a ciphertext buffer without decrypting it.
    ///
    /// Returns the length of the clear prefix.
    pub fn check_ciphertext(&self, data: &[u8]) -> Result<usize, CipherError> {
        if data.len() % BLOCK_SIZE != 0 {
            return Err(CipherError::MisalignedCiphertext {
                len: data.len(),
                block_size: BLOCK_SIZE,
            });
        }
        self.prefix_len(data.len())
    }

    pub fn decrypt(&self, data: &[u8]) -> Result<Vec<u8>, CipherError> {
        let prefix = self.check_ciphertext(data)?;

        let mut out = data.to_vec();
        for_each_block(&mut out[prefix..], |block| self.cipher.decrypt_block(block));
        Ok(out)
    }

    pub fn encrypt(&self, data: &[u8]) -> Result<Vec<u8>, CipherError> {
        if data.len() % BLOCK_SIZE != 0 {
            return Err(CipherError::MisalignedPlaintext {
                len: data.len(),
                block_size: BLOCK_SIZE,
            });
        }
        let prefix = self.prefix_len(data.len())?;

        let mut out = data.to_vec();
        for_each_block(&mut out[prefix..], |block| self.cipher.encrypt_block(block));
        Ok(out)
    }
}

fn for_each_block(body: &mut [u8], mut f: impl FnMut(&mut [u8; BLOCK_SIZE])) {
    for chunk in body.chunks_exact_mut(BLOCK_SIZE) {
        if let Ok(block) = <&mut [u8; BLOCK_SIZE]>::try_from(chunk) {
            f(block);
        }
    }
}
