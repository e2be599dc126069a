//! Pairing cryptography collaborator
//!
//! The toolbox functions of the Security Manager (c1, s1, f4, f5, f6, g2)
//! are expressed as a trait so a real implementation can be plugged in.
//! The stack ships only [`Unsupported`], which refuses every primitive.

use super::SmpError;

/// 128-bit little-endian SMP value
pub type Block = [u8; 16];

pub trait PairingCrypto: Send + Sync {
    /// LE legacy confirm value generation
    #[allow(clippy::too_many_arguments)]
    fn c1(
        &self,
        tk: &Block,
        rand: &Block,
        preq: &[u8; 7],
        pres: &[u8; 7],
        iat: u8,
        ia: &[u8; 6],
        rat: u8,
        ra: &[u8; 6],
    ) -> Result<Block, SmpError>;

    /// LE legacy short term key generation
    fn s1(&self, tk: &Block, r1: &Block, r2: &Block) -> Result<Block, SmpError>;

    /// Secure Connections confirm value
    fn f4(&self, u: &[u8; 32], v: &[u8; 32], x: &Block, z: u8) -> Result<Block, SmpError>;

    /// Secure Connections key generation, returning (MacKey, LTK)
    fn f5(
        &self,
        dhkey: &[u8; 32],
        n1: &Block,
        n2: &Block,
        a1: &[u8; 7],
        a2: &[u8; 7],
    ) -> Result<(Block, Block), SmpError>;

    /// Secure Connections check value
    #[allow(clippy::too_many_arguments)]
    fn f6(
        &self,
        w: &Block,
        n1: &Block,
        n2: &Block,
        r: &Block,
        io_cap: &[u8; 3],
        a1: &[u8; 7],
        a2: &[u8; 7],
    ) -> Result<Block, SmpError>;

    /// Secure Connections numeric comparison value
    fn g2(&self, u: &[u8; 32], v: &[u8; 32], x: &Block, y: &Block) -> Result<u32, SmpError>;

    /// Fresh random value for pairing nonces
    fn random(&self) -> Block {
        rand::random()
    }
}

/// Refuses every primitive
#[derive(Debug, Default, Clone, Copy)]
pub struct Unsupported;

impl PairingCrypto for Unsupported {
    #[allow(clippy::too_many_arguments)]
    fn c1(
        &self,
        _tk: &Block,
        _rand: &Block,
        _preq: &[u8; 7],
        _pres: &[u8; 7],
        _iat: u8,
        _ia: &[u8; 6],
        _rat: u8,
        _ra: &[u8; 6],
    ) -> Result<Block, SmpError> {
        Err(SmpError::Unsupported("c1"))
    }

    fn s1(&self, _tk: &Block, _r1: &Block, _r2: &Block) -> Result<Block, SmpError> {
        Err(SmpError::Unsupported("s1"))
    }

    fn f4(&self, _u: &[u8; 32], _v: &[u8; 32], _x: &Block, _z: u8) -> Result<Block, SmpError> {
        Err(SmpError::Unsupported("f4"))
    }

    fn f5(
        &self,
        _dhkey: &[u8; 32],
        _n1: &Block,
        _n2: &Block,
        _a1: &[u8; 7],
        _a2: &[u8; 7],
    ) -> Result<(Block, Block), SmpError> {
        Err(SmpError::Unsupported("f5"))
    }

    #[allow(clippy::too_many_arguments)]
    fn f6(
        &self,
        _w: &Block,
        _n1: &Block,
        _n2: &Block,
        _r: &Block,
        _io_cap: &[u8; 3],
        _a1: &[u8; 7],
        _a2: &[u8; 7],
    ) -> Result<Block, SmpError> {
        Err(SmpError::Unsupported("f6"))
    }

    fn g2(&self, _u: &[u8; 32], _v: &[u8; 32], _x: &Block, _y: &Block) -> Result<u32, SmpError> {
        Err(SmpError::Unsupported("g2"))
    }
}
