use crate::constants::*;
use crate::error::{MmError, Result};
use crate::memory::AccessMode;

/// Geometry and policy of one simulated machine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MmConfig {
    pub ram_size: usize,
    pub swap_sizes: Vec<usize>,
    /// Swap device that receives evicted pages
    pub active_swap: usize,
    pub tlb_slots: usize,
    pub ram_mode: AccessMode,
    pub swap_mode: AccessMode,
    /// Swap out the FIFO victim instead of failing when RAM runs out while mapping
    pub evict_on_exhaustion: bool,
}

impl Default for MmConfig {
    fn default() -> Self {
        MmConfig {
            ram_size: DEFAULT_RAM_SIZE,
            swap_sizes: vec![DEFAULT_SWAP_SIZE],
            active_swap: 0,
            tlb_slots: DEFAULT_TLB_SLOTS,
            ram_mode: AccessMode::Random,
            swap_mode: AccessMode::Random,
            evict_on_exhaustion: false,
        }
    }
}

impl MmConfig {
    pub fn validate(&self) -> Result<()> {
        check_device_size("ram", self.ram_size, MAX_RAM_SIZE)?;
        if self.swap_sizes.is_empty() || self.swap_sizes.len() > MAX_SWAP_DEVICES {
            return Err(MmError::InvalidConfig(format!(
                "expected 1..={} swap devices, got {}",
                MAX_SWAP_DEVICES,
                self.swap_sizes.len()
            )));
        }
        for &size in &self.swap_sizes {
            check_device_size("swap", size, MAX_SWAP_SIZE)?;
        }
        if self.active_swap >= self.swap_sizes.len() {
            return Err(MmError::InvalidConfig(format!(
                "active swap {} but only {} swap devices",
                self.active_swap,
                self.swap_sizes.len()
            )));
        }
        if self.tlb_slots == 0 {
            return Err(MmError::InvalidConfig("tlb needs at least one slot".to_string()));
        }
        Ok(())
    }

    /// Apply one `key value...` setting
    pub fn set(&mut self, key: &str, values: &[&str]) -> Result<()> {
        let first = values
            .first()
            .ok_or_else(|| MmError::InvalidConfig(format!("'{}' needs a value", key)))?;
        match key {
            "ram" => self.ram_size = parse_size(first)?,
            "swap" => {
                self.swap_sizes = values.iter().map(|v| parse_size(v)).collect::<Result<_>>()?;
            }
            "active_swap" => self.active_swap = parse_size(first)?,
            "tlb" => self.tlb_slots = parse_size(first)?,
            "evict" => self.evict_on_exhaustion = parse_switch(first)?,
            "ram_mode" => self.ram_mode = parse_mode(first)?,
            "swap_mode" => self.swap_mode = parse_mode(first)?,
            _ => return Err(MmError::InvalidConfig(format!("unknown setting '{}'", key))),
        }
        Ok(())
    }
}

fn check_device_size(name: &str, size: usize, max: usize) -> Result<()> {
    if size == 0 || size % PAGE_SIZE != 0 || size > max {
        return Err(MmError::InvalidConfig(format!(
            "{} size {} must be a non-zero multiple of {} up to {}",
            name, size, PAGE_SIZE, max
        )));
    }
    Ok(())
}

/// Decimal or `0x` hexadecimal
fn parse_size(token: &str) -> Result<usize> {
    let parsed = match token.strip_prefix("0x") {
        Some(hex) => usize::from_str_radix(hex, 16),
        None => token.parse(),
    };
    parsed.map_err(|_| MmError::InvalidConfig(format!("invalid number '{}'", token)))
}

fn parse_switch(token: &str) -> Result<bool> {
    match token {
        "on" | "true" | "1" => Ok(true),
        "off" | "false" | "0" => Ok(false),
        _ => Err(MmError::InvalidConfig(format!("invalid switch '{}'", token))),
    }
}

fn parse_mode(token: &str) -> Result<AccessMode> {
    match token {
        "random" => Ok(AccessMode::Random),
        "sequential" => Ok(AccessMode::Sequential),
        _ => Err(MmError::InvalidConfig(format!("invalid access mode '{}'", token))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_is_valid() {
        assert!(MmConfig::default().validate().is_ok());
    }

    #[test]
    fn test_rejects_bad_geometry() {
        let mut config = MmConfig { ram_size: 100, ..Default::default() };
        assert!(config.validate().is_err());

        config.ram_size = MAX_RAM_SIZE + PAGE_SIZE;
        assert!(config.validate().is_err());

        config = MmConfig { swap_sizes: vec![], ..Default::default() };
        assert!(config.validate().is_err());

        config = MmConfig { swap_sizes: vec![PAGE_SIZE; 5], ..Default::default() };
        assert!(config.validate().is_err());

        config = MmConfig { active_swap: 1, ..Default::default() };
        assert!(config.validate().is_err());

        config = MmConfig { tlb_slots: 0, ..Default::default() };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_set_values() {
        let mut config = MmConfig::default();
        config.set("ram", &["0x800"]).unwrap();
        config.set("swap", &["1024", "2048"]).unwrap();
        config.set("active_swap", &["1"]).unwrap();
        config.set("tlb", &["64"]).unwrap();
        config.set("evict", &["on"]).unwrap();
        config.set("swap_mode", &["sequential"]).unwrap();

        assert_eq!(config.ram_size, 0x800);
        assert_eq!(config.swap_sizes, vec![1024, 2048]);
        assert_eq!(config.active_swap, 1);
        assert_eq!(config.tlb_slots, 64);
        assert!(config.evict_on_exhaustion);
        assert_eq!(config.swap_mode, AccessMode::Sequential);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_set_errors() {
        let mut config = MmConfig::default();
        assert!(config.set("ram", &[]).is_err());
        assert!(config.set("ram", &["lots"]).is_err());
        assert!(config.set("evict", &["maybe"]).is_err());
        assert!(config.set("colour", &["blue"]).is_err());
    }
}
