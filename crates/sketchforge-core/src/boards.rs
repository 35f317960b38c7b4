//! Supported board definitions.
//!
//! Maps the fully-qualified board names (fqbn) accepted by the API onto the
//! PlatformIO board id and platform the toolchain understands. The fqbn's
//! middle segment is the architecture tag matched against a library's
//! `architectures` declaration.

use crate::error::{Error, Result};

/// One supported compile target.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Board {
    /// Fully-qualified board name as sent by clients, e.g. `arduino:avr:uno`.
    pub fqbn: &'static str,
    /// PlatformIO board id, e.g. `uno`.
    pub id: &'static str,
    /// PlatformIO platform, e.g. `atmelavr`.
    pub platform: &'static str,
}

/// Every board the service compiles for. Slot configs are pre-templated
/// with all of these at startup.
pub const BOARDS: &[Board] = &[
    Board {
        fqbn: "arduino:avr:uno",
        id: "uno",
        platform: "atmelavr",
    },
    Board {
        fqbn: "arduino:avr:nano",
        id: "nanoatmega328",
        platform: "atmelavr",
    },
    Board {
        fqbn: "arduino:avr:mega",
        id: "megaADK",
        platform: "atmelavr",
    },
    Board {
        fqbn: "arduino:esp32:nano_nora",
        id: "arduino_nano_esp32",
        platform: "espressif32",
    },
];

impl Board {
    /// Architecture tag of this board, the middle fqbn segment (`avr`,
    /// `esp32`, ...).
    pub fn arch_tag(&self) -> &'static str {
        self.fqbn.split(':').nth(1).unwrap_or_default()
    }

    /// Whether a library's declared `architectures` list covers this board.
    /// `*` means universal.
    pub fn supported_by(&self, architectures: &[String]) -> bool {
        architectures
            .iter()
            .any(|a| a == "*" || a == self.arch_tag())
    }
}

/// Look up a board by fqbn. Unknown boards are rejected before any
/// subprocess is spawned.
pub fn lookup(fqbn: &str) -> Result<&'static Board> {
    BOARDS
        .iter()
        .find(|b| b.fqbn == fqbn)
        .ok_or_else(|| Error::InvalidInput(format!("unknown board: {fqbn}")))
}

/// The `[env:<id>]` sections for every supported board, shared by the
/// per-slot base config and per-artifact build configs.
pub fn board_env_sections() -> String {
    let mut out = String::new();
    for board in BOARDS {
        out.push_str(&format!(
            "\n[env:{}]\nplatform = {}\nboard = {}\n",
            board.id, board.platform, board.id
        ));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lookup_known_boards() {
        let board = lookup("arduino:avr:uno").unwrap();
        assert_eq!(board.id, "uno");
        assert_eq!(board.platform, "atmelavr");
        assert_eq!(board.arch_tag(), "avr");

        let board = lookup("arduino:esp32:nano_nora").unwrap();
        assert_eq!(board.id, "arduino_nano_esp32");
        assert_eq!(board.arch_tag(), "esp32");
    }

    #[test]
    fn test_lookup_unknown_board() {
        assert!(matches!(
            lookup("acme:riscv:devboard"),
            Err(Error::InvalidInput(_))
        ));
    }

    #[test]
    fn test_architecture_matching() {
        let uno = lookup("arduino:avr:uno").unwrap();
        assert!(uno.supported_by(&["avr".to_string()]));
        assert!(uno.supported_by(&["*".to_string()]));
        assert!(!uno.supported_by(&["esp32".to_string()]));
    }

    #[test]
    fn test_board_env_sections_cover_all_boards() {
        let sections = board_env_sections();
        for board in BOARDS {
            assert!(sections.contains(&format!("[env:{}]", board.id)));
            assert!(sections.contains(&format!("platform = {}", board.platform)));
        }
    }
}
