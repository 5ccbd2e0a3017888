//! Frame Schedule
//!
//! One radio frame is a fixed, configuration-time sequence of OFDM symbols.
//! The schedule is written as a string, one character per symbol:
//! `P` pilot, `U` uplink data, `D` downlink data, `C` calibration downlink,
//! `L` calibration uplink, `G` guard. For example `"PPUUDD"` is a frame of
//! two pilots, two uplink and two downlink symbols.

use crate::PhyError;
use serde::Deserialize;

/// Classification of one symbol position within a frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SymbolKind {
    Pilot,
    Uplink,
    Downlink,
    CalibDl,
    CalibUl,
    Guard,
}

/// Immutable per-configuration symbol schedule with logical<->absolute
/// symbol index maps for each direction.
#[derive(Debug, Clone, Deserialize)]
#[serde(try_from = "String")]
pub struct FrameSchedule {
    kinds: Vec<SymbolKind>,
    pilot_syms: Vec<usize>,
    ul_syms: Vec<usize>,
    dl_syms: Vec<usize>,
    num_calib_syms: usize,
    /// Absolute symbol index -> logical uplink index.
    ul_idx: Vec<Option<usize>>,
    /// Absolute symbol index -> logical downlink index.
    dl_idx: Vec<Option<usize>>,
}

impl FrameSchedule {
    pub fn parse(pattern: &str) -> Result<Self, PhyError> {
        if pattern.is_empty() {
            return Err(PhyError::InvalidConfiguration(
                "empty frame schedule".to_string(),
            ));
        }
        let mut kinds = Vec::with_capacity(pattern.len());
        for (i, c) in pattern.chars().enumerate() {
            let kind = match c {
                'P' => SymbolKind::Pilot,
                'U' => SymbolKind::Uplink,
                'D' => SymbolKind::Downlink,
                'C' => SymbolKind::CalibDl,
                'L' => SymbolKind::CalibUl,
                'G' => SymbolKind::Guard,
                other => {
                    return Err(PhyError::InvalidConfiguration(format!(
                        "frame schedule: unknown symbol '{}' at position {}",
                        other, i
                    )))
                }
            };
            kinds.push(kind);
        }

        let mut pilot_syms = Vec::new();
        let mut ul_syms = Vec::new();
        let mut dl_syms = Vec::new();
        let mut num_calib_syms = 0;
        let mut ul_idx = vec![None; kinds.len()];
        let mut dl_idx = vec![None; kinds.len()];
        for (sym, kind) in kinds.iter().enumerate() {
            match kind {
                SymbolKind::Pilot => pilot_syms.push(sym),
                SymbolKind::Uplink => {
                    ul_idx[sym] = Some(ul_syms.len());
                    ul_syms.push(sym);
                }
                SymbolKind::Downlink => {
                    dl_idx[sym] = Some(dl_syms.len());
                    dl_syms.push(sym);
                }
                SymbolKind::CalibDl | SymbolKind::CalibUl => num_calib_syms += 1,
                SymbolKind::Guard => {}
            }
        }

        Ok(Self {
            kinds,
            pilot_syms,
            ul_syms,
            dl_syms,
            num_calib_syms,
            ul_idx,
            dl_idx,
        })
    }

    pub fn kind(&self, symbol: usize) -> SymbolKind {
        self.kinds[symbol]
    }

    pub fn num_total_syms(&self) -> usize {
        self.kinds.len()
    }

    pub fn num_pilot_syms(&self) -> usize {
        self.pilot_syms.len()
    }

    pub fn num_ul_syms(&self) -> usize {
        self.ul_syms.len()
    }

    pub fn num_dl_syms(&self) -> usize {
        self.dl_syms.len()
    }

    /// Data symbols of either direction; queue sizing scales with this.
    pub fn num_data_syms(&self) -> usize {
        self.ul_syms.len() + self.dl_syms.len()
    }

    pub fn num_calib_syms(&self) -> usize {
        self.num_calib_syms
    }

    /// Whether reciprocity calibration symbols are present.
    pub fn is_rec_cal_enabled(&self) -> bool {
        self.num_calib_syms > 0
    }

    /// Absolute symbol index of the i-th pilot symbol.
    pub fn pilot_symbol(&self, i: usize) -> usize {
        self.pilot_syms[i]
    }

    /// Absolute symbol index of the i-th uplink symbol.
    pub fn ul_symbol(&self, i: usize) -> usize {
        self.ul_syms[i]
    }

    /// Absolute symbol index of the i-th downlink symbol.
    pub fn dl_symbol(&self, i: usize) -> usize {
        self.dl_syms[i]
    }

    /// Logical uplink index of an absolute symbol index, if it is UL.
    pub fn ul_symbol_idx(&self, symbol: usize) -> Option<usize> {
        self.ul_idx.get(symbol).copied().flatten()
    }

    /// Logical downlink index of an absolute symbol index, if it is DL.
    pub fn dl_symbol_idx(&self, symbol: usize) -> Option<usize> {
        self.dl_idx.get(symbol).copied().flatten()
    }

    /// Logical pilot index of an absolute symbol index, if it is a pilot.
    pub fn pilot_symbol_idx(&self, symbol: usize) -> Option<usize> {
        self.pilot_syms.iter().position(|&s| s == symbol)
    }
}

impl TryFrom<String> for FrameSchedule {
    type Error = PhyError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        FrameSchedule::parse(&s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_basic() {
        let fs = FrameSchedule::parse("PPUUDD").unwrap();
        assert_eq!(fs.num_total_syms(), 6);
        assert_eq!(fs.num_pilot_syms(), 2);
        assert_eq!(fs.num_ul_syms(), 2);
        assert_eq!(fs.num_dl_syms(), 2);
        assert_eq!(fs.num_data_syms(), 4);
        assert!(!fs.is_rec_cal_enabled());
    }

    #[test]
    fn test_index_maps() {
        let fs = FrameSchedule::parse("PGUUDD").unwrap();
        assert_eq!(fs.ul_symbol(0), 2);
        assert_eq!(fs.ul_symbol(1), 3);
        assert_eq!(fs.ul_symbol_idx(3), Some(1));
        assert_eq!(fs.ul_symbol_idx(4), None);
        assert_eq!(fs.dl_symbol_idx(4), Some(0));
        assert_eq!(fs.dl_symbol(1), 5);
        assert_eq!(fs.kind(1), SymbolKind::Guard);
    }

    #[test]
    fn test_calibration_symbols() {
        let fs = FrameSchedule::parse("PCLUU").unwrap();
        assert!(fs.is_rec_cal_enabled());
        assert_eq!(fs.num_calib_syms(), 2);
        assert_eq!(fs.kind(1), SymbolKind::CalibDl);
        assert_eq!(fs.kind(2), SymbolKind::CalibUl);
    }

    #[test]
    fn test_reject_unknown() {
        assert!(FrameSchedule::parse("PXU").is_err());
        assert!(FrameSchedule::parse("").is_err());
    }
}
