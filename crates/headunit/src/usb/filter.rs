//! Candidate filtering
//!
//! Decides which attached devices are worth a negotiation attempt. Hubs are
//! never candidates, devices already in accessory mode always are, and
//! everything else must match one of the configured VID:PID patterns (no
//! patterns means every device is tried).

use aoap::{AccessoryIds, UsbIds};

/// USB class code of a hub
const HUB_CLASS: u8 = 0x09;

/// How a device is treated by enumeration and hotplug
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Candidacy {
    /// Already in accessory mode
    Accessory,
    /// Worth a negotiation attempt
    Candidate,
    /// Hub; never negotiated
    Hub,
    /// Excluded by the configured patterns
    Filtered,
}

impl Candidacy {
    pub fn is_negotiable(self) -> bool {
        matches!(self, Candidacy::Accessory | Candidacy::Candidate)
    }

    pub fn label(self) -> &'static str {
        match self {
            Candidacy::Accessory => "accessory",
            Candidacy::Candidate => "candidate",
            Candidacy::Hub => "hub",
            Candidacy::Filtered => "filtered",
        }
    }
}

#[derive(Debug, Clone)]
pub struct DeviceFilter {
    accessory: AccessoryIds,
    patterns: Vec<String>,
}

impl DeviceFilter {
    pub fn new(accessory: AccessoryIds, patterns: Vec<String>) -> Self {
        Self {
            accessory,
            patterns,
        }
    }

    pub fn classify(&self, ids: UsbIds, class_code: u8) -> Candidacy {
        if self.accessory.matches_ids(ids) {
            Candidacy::Accessory
        } else if class_code == HUB_CLASS {
            Candidacy::Hub
        } else if Self::check_filter(ids.vendor_id, ids.product_id, &self.patterns) {
            Candidacy::Candidate
        } else {
            Candidacy::Filtered
        }
    }

    /// Check if a VID/PID pair is allowed by the filters
    pub fn check_filter(vid: u16, pid: u16, filters: &[String]) -> bool {
        // If no filters are defined, all devices are allowed
        if filters.is_empty() {
            return true;
        }

        filters.iter().any(|filter| {
            // Filter format: "0xVID:0xPID", "0xVID:*" or "*:0xPID"
            let Some((vid_str, pid_str)) = filter.split_once(':') else {
                return false;
            };
            Self::part_matches(vid_str, vid) && Self::part_matches(pid_str, pid)
        })
    }

    fn part_matches(pattern: &str, value: u16) -> bool {
        if pattern == "*" {
            return true;
        }
        let hex = pattern
            .strip_prefix("0x")
            .or_else(|| pattern.strip_prefix("0X"))
            .unwrap_or(pattern);
        u16::from_str_radix(hex, 16)
            .map(|v| v == value)
            .unwrap_or(false)
    }
}
