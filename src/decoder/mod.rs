//! Fixed-offset binary decoders for pool-state and position-state accounts.
//!
//! The stream subscriber sees a firehose of raw account buffers and needs to
//! turn them into typed records without depending on a schema-evolving
//! on-chain client library. We read known fields at known byte offsets and
//! sanity-check the result (bin step range) so layout drift surfaces as a
//! loud decode error instead of silent garbage downstream.

use crate::core::error::DecodeError;
use crate::core::types::Side;
use solana_sdk::pubkey::Pubkey;

const POOL_MIN_LEN: usize = 138;
const POSITION_MIN_LEN: usize = 129;

const OFF_ACTIVE_BIN: usize = 0;
const OFF_BIN_STEP: usize = 4;
const OFF_STATUS: usize = 6;
const OFF_MINT_X: usize = 8;
const OFF_MINT_Y: usize = 40;
const OFF_RESERVE_X: usize = 72;
const OFF_RESERVE_Y: usize = 104;
const OFF_TOKEN_PROGRAM_X: usize = 136;
const OFF_TOKEN_PROGRAM_Y: usize = 137;

const OFF_POS_OWNER: usize = 0;
const OFF_POS_POOL: usize = 32;
const OFF_POS_AUX: usize = 64;
const OFF_POS_SIDE: usize = 96;
const OFF_POS_MIN_BIN: usize = 97;
const OFF_POS_MAX_BIN: usize = 101;
const OFF_POS_INITIAL_AMOUNT: usize = 105;
const OFF_POS_HARVESTED_AMOUNT: usize = 113;
const OFF_POS_CREATED_AT: usize = 121;

/// Width in bytes of one bin's entry in an auxiliary position's balance
/// array: amount-X (u64 LE) followed by amount-Y (u64 LE).
pub const BIN_BALANCE_ENTRY_LEN: usize = 16;

/// Whether a mint uses the legacy token program or a token-2022 extension.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum TokenProgramKind {
    Standard,
    Extended,
}

impl TokenProgramKind {
    fn from_byte(b: u8) -> Self {
        if b == 0 {
            TokenProgramKind::Standard
        } else {
            TokenProgramKind::Extended
        }
    }
}

/// Decoded snapshot of a pool's on-chain state.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct PoolInfo {
    pub active_bin: i32,
    pub bin_step: u16,
    pub status: u8,
    pub token_x_mint: Pubkey,
    pub token_y_mint: Pubkey,
    pub reserve_x: Pubkey,
    pub reserve_y: Pubkey,
    pub token_x_program: TokenProgramKind,
    pub token_y_program: TokenProgramKind,
}

/// Decoded snapshot of one position account.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct DecodedPosition {
    pub owner: Pubkey,
    pub pool: Pubkey,
    pub aux: Pubkey,
    pub side: Side,
    pub min_bin: i32,
    pub max_bin: i32,
    pub initial_amount: u64,
    pub harvested_amount: u64,
    pub created_at: i64,
}

fn read_pubkey(buf: &[u8], off: usize) -> Pubkey {
    let mut arr = [0u8; 32];
    arr.copy_from_slice(&buf[off..off + 32]);
    Pubkey::from(arr)
}

/// Decode a pool-state account buffer. `buf` is expected to already start
/// at the struct's first field (any leading discriminator is the caller's
/// concern to strip).
pub fn decode_pool_info(buf: &[u8]) -> Result<PoolInfo, DecodeError> {
    if buf.len() < POOL_MIN_LEN {
        return Err(DecodeError::TooShort {
            got: buf.len(),
            need: POOL_MIN_LEN,
        });
    }

    let active_bin = i32::from_le_bytes(buf[OFF_ACTIVE_BIN..OFF_ACTIVE_BIN + 4].try_into().unwrap());
    let bin_step = u16::from_le_bytes(buf[OFF_BIN_STEP..OFF_BIN_STEP + 2].try_into().unwrap());

    if bin_step == 0 || bin_step > 500 {
        return Err(DecodeError::InvalidBinStep(bin_step));
    }

    Ok(PoolInfo {
        active_bin,
        bin_step,
        status: buf[OFF_STATUS],
        token_x_mint: read_pubkey(buf, OFF_MINT_X),
        token_y_mint: read_pubkey(buf, OFF_MINT_Y),
        reserve_x: read_pubkey(buf, OFF_RESERVE_X),
        reserve_y: read_pubkey(buf, OFF_RESERVE_Y),
        token_x_program: TokenProgramKind::from_byte(buf[OFF_TOKEN_PROGRAM_X]),
        token_y_program: TokenProgramKind::from_byte(buf[OFF_TOKEN_PROGRAM_Y]),
    })
}

/// Decode a position-state account buffer.
pub fn decode_position(buf: &[u8]) -> Result<DecodedPosition, DecodeError> {
    if buf.len() < POSITION_MIN_LEN {
        return Err(DecodeError::TooShort {
            got: buf.len(),
            need: POSITION_MIN_LEN,
        });
    }

    let side_byte = buf[OFF_POS_SIDE];
    let side = Side::from_byte(side_byte).ok_or(DecodeError::InvalidSide(side_byte))?;

    let min_bin = i32::from_le_bytes(buf[OFF_POS_MIN_BIN..OFF_POS_MIN_BIN + 4].try_into().unwrap());
    let max_bin = i32::from_le_bytes(buf[OFF_POS_MAX_BIN..OFF_POS_MAX_BIN + 4].try_into().unwrap());
    let initial_amount = u64::from_le_bytes(
        buf[OFF_POS_INITIAL_AMOUNT..OFF_POS_INITIAL_AMOUNT + 8].try_into().unwrap(),
    );
    let harvested_amount = u64::from_le_bytes(
        buf[OFF_POS_HARVESTED_AMOUNT..OFF_POS_HARVESTED_AMOUNT + 8].try_into().unwrap(),
    );
    let created_at = i64::from_le_bytes(
        buf[OFF_POS_CREATED_AT..OFF_POS_CREATED_AT + 8].try_into().unwrap(),
    );

    Ok(DecodedPosition {
        owner: read_pubkey(buf, OFF_POS_OWNER),
        pool: read_pubkey(buf, OFF_POS_POOL),
        aux: read_pubkey(buf, OFF_POS_AUX),
        side,
        min_bin,
        max_bin,
        initial_amount,
        harvested_amount,
        created_at,
    })
}

/// Decode an auxiliary position's per-bin balance array. The account is a
/// flat, contiguous list of `(amountX, amountY)` pairs in ascending bin
/// order starting at `min_bin` — the on-chain program CPI's into an
/// external position type for this, so there's no discriminator to skip;
/// `buf` starts at the first bin's amount-X field.
pub fn decode_bin_balances(buf: &[u8], min_bin: i32, bin_count: usize) -> Result<Vec<(i32, u64, u64)>, DecodeError> {
    let need = bin_count * BIN_BALANCE_ENTRY_LEN;
    if buf.len() < need {
        return Err(DecodeError::TooShort { got: buf.len(), need });
    }

    let mut bins = Vec::with_capacity(bin_count);
    for i in 0..bin_count {
        let off = i * BIN_BALANCE_ENTRY_LEN;
        let amount_x = u64::from_le_bytes(buf[off..off + 8].try_into().unwrap());
        let amount_y = u64::from_le_bytes(buf[off + 8..off + 16].try_into().unwrap());
        bins.push((min_bin + i as i32, amount_x, amount_y));
    }
    Ok(bins)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_pool_buf(bin_step: u16) -> Vec<u8> {
        let mut buf = vec![0u8; POOL_MIN_LEN];
        buf[OFF_ACTIVE_BIN..OFF_ACTIVE_BIN + 4].copy_from_slice(&42i32.to_le_bytes());
        buf[OFF_BIN_STEP..OFF_BIN_STEP + 2].copy_from_slice(&bin_step.to_le_bytes());
        buf[OFF_STATUS] = 1;
        buf
    }

    #[test]
    fn decodes_valid_pool() {
        let buf = sample_pool_buf(25);
        let pool = decode_pool_info(&buf).unwrap();
        assert_eq!(pool.active_bin, 42);
        assert_eq!(pool.bin_step, 25);
        assert_eq!(pool.status, 1);
    }

    #[test]
    fn rejects_short_pool_buffer() {
        let buf = vec![0u8; 10];
        assert_eq!(
            decode_pool_info(&buf),
            Err(DecodeError::TooShort { got: 10, need: POOL_MIN_LEN })
        );
    }

    #[test]
    fn rejects_zero_bin_step() {
        let buf = sample_pool_buf(0);
        assert_eq!(decode_pool_info(&buf), Err(DecodeError::InvalidBinStep(0)));
    }

    #[test]
    fn rejects_oversize_bin_step() {
        let buf = sample_pool_buf(501);
        assert_eq!(decode_pool_info(&buf), Err(DecodeError::InvalidBinStep(501)));
    }

    fn sample_position_buf(side: u8, min_bin: i32, max_bin: i32) -> Vec<u8> {
        let mut buf = vec![0u8; POSITION_MIN_LEN];
        buf[OFF_POS_SIDE] = side;
        buf[OFF_POS_MIN_BIN..OFF_POS_MIN_BIN + 4].copy_from_slice(&min_bin.to_le_bytes());
        buf[OFF_POS_MAX_BIN..OFF_POS_MAX_BIN + 4].copy_from_slice(&max_bin.to_le_bytes());
        buf[OFF_POS_INITIAL_AMOUNT..OFF_POS_INITIAL_AMOUNT + 8].copy_from_slice(&1_000u64.to_le_bytes());
        buf
    }

    #[test]
    fn decodes_valid_position() {
        let buf = sample_position_buf(1, 10, 20);
        let pos = decode_position(&buf).unwrap();
        assert_eq!(pos.side, Side::Sell);
        assert_eq!(pos.min_bin, 10);
        assert_eq!(pos.max_bin, 20);
        assert_eq!(pos.initial_amount, 1_000);
    }

    #[test]
    fn rejects_invalid_side_byte() {
        let buf = sample_position_buf(7, 0, 1);
        assert_eq!(decode_position(&buf), Err(DecodeError::InvalidSide(7)));
    }

    #[test]
    fn rejects_short_position_buffer() {
        let buf = vec![0u8; 50];
        assert_eq!(
            decode_position(&buf),
            Err(DecodeError::TooShort { got: 50, need: POSITION_MIN_LEN })
        );
    }

    #[test]
    fn decodes_bin_balances_in_ascending_order() {
        let mut buf = Vec::new();
        for (x, y) in [(0u64, 0u64), (1_000, 0), (0, 500)] {
            buf.extend_from_slice(&x.to_le_bytes());
            buf.extend_from_slice(&y.to_le_bytes());
        }
        let bins = decode_bin_balances(&buf, 96, 3).unwrap();
        assert_eq!(bins, vec![(96, 0, 0), (97, 1_000, 0), (98, 0, 500)]);
    }

    #[test]
    fn rejects_short_bin_balance_buffer() {
        let buf = vec![0u8; 16];
        assert_eq!(
            decode_bin_balances(&buf, 0, 2),
            Err(DecodeError::TooShort { got: 16, need: 32 })
        );
    }
}
