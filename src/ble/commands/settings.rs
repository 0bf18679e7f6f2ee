//! Setting read/write (spec §4.6 table) and the basal-program indices
//! (spec §4.6: "Settings indices").

use crate::ble::constants;
use crate::ble::protocol::PumpLink;
use crate::error::{PumpError, PumpResult};
use crate::glb;

pub const ACTIVE_PROGRAM_INDEX: i32 = 1;
pub const PROGRAM_A_SELECTOR: i32 = 3;
pub const PROGRAM_B_SELECTOR: i32 = 10;

const PROGRAM_A_FIRST_HOUR_INDEX: i32 = 14;
const PROGRAM_B_FIRST_HOUR_INDEX: i32 = 38;

/// 0xFFFFFFFF (-1 as i32) is the pump's "unprogrammed slot" sentinel.
const UNPROGRAMMED: i32 = -1;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BasalProgram {
    A,
    B,
}

impl BasalProgram {
    pub fn selector(self) -> i32 {
        match self {
            Self::A => PROGRAM_A_SELECTOR,
            Self::B => PROGRAM_B_SELECTOR,
        }
    }

    /// Setting index for a given hour-of-day (0..24).
    pub fn hour_index(self, hour: u8) -> i32 {
        let base = match self {
            Self::A => PROGRAM_A_FIRST_HOUR_INDEX,
            Self::B => PROGRAM_B_FIRST_HOUR_INDEX,
        };
        base + hour as i32
    }
}

/// Centi-units-per-hour raw setting value to U/h, normalizing the
/// "unprogrammed" sentinel to 0.0.
pub fn normalize_basal_rate(raw: i32) -> f64 {
    if raw == UNPROGRAMMED {
        0.0
    } else {
        raw as f64 / 100.0
    }
}

pub async fn read_setting(link: &PumpLink, index: i32) -> PumpResult<i32> {
    link.send_command(&constants::setting_id(), &glb::encode(index), false)
        .await?;
    let response = link
        .read_response(&constants::setting_value(), false)
        .await?
        .ok_or_else(|| PumpError::Transport("setting value read returned nothing".into()))?;
    glb::find_in(&response).ok_or(PumpError::GlbCorrupt)
}

pub async fn write_setting(link: &PumpLink, index: i32, value: i32) -> PumpResult<()> {
    link.send_command(&constants::setting_id(), &glb::encode(index), false)
        .await?;
    link.send_command(&constants::setting_value(), &glb::encode(value), false)
        .await
}

pub async fn read_active_program(link: &PumpLink) -> PumpResult<i32> {
    read_setting(link, ACTIVE_PROGRAM_INDEX).await
}

pub async fn set_active_program(link: &PumpLink, program: BasalProgram) -> PumpResult<()> {
    write_setting(link, ACTIVE_PROGRAM_INDEX, program.selector()).await
}

pub async fn read_basal_rate(link: &PumpLink, program: BasalProgram, hour: u8) -> PumpResult<f64> {
    let raw = read_setting(link, program.hour_index(hour)).await?;
    Ok(normalize_basal_rate(raw))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn program_hour_indices_span_the_documented_ranges() {
        assert_eq!(BasalProgram::A.hour_index(0), 14);
        assert_eq!(BasalProgram::A.hour_index(23), 37);
        assert_eq!(BasalProgram::B.hour_index(0), 38);
        assert_eq!(BasalProgram::B.hour_index(23), 61);
    }

    #[test]
    fn normalize_basal_rate_handles_sentinel_and_real_values() {
        assert_eq!(normalize_basal_rate(-1), 0.0);
        assert_eq!(normalize_basal_rate(150), 1.5);
    }
}
