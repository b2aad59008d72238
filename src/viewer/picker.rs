//! Terminal graphics protocol selection for the mirrored picture.

use ratatui_image::picker::{Picker, ProtocolType};
use tracing::{info, warn};

/// Pick the graphics protocol. A name from `--graphics` wins; otherwise the
/// terminal is queried, then guessed from the environment, then halfblocks.
///
/// Must run before raw mode / the alternate screen is entered.
pub fn create_picker(force_protocol: Option<&str>) -> Picker {
    if let Some(name) = force_protocol {
        match protocol_by_name(name) {
            Some(proto) => {
                let mut picker = Picker::halfblocks();
                picker.set_protocol_type(proto);
                info!(protocol = ?proto, "graphics protocol forced");
                return picker;
            }
            None => warn!(name, "unknown graphics protocol, auto-detecting"),
        }
    }

    match Picker::from_query_stdio() {
        Ok(picker) => {
            info!(protocol = ?picker.protocol_type(), "graphics protocol detected");
            picker
        }
        Err(e) => {
            let proto = guess_from_env(
                &std::env::var("TERM_PROGRAM").unwrap_or_default(),
                &std::env::var("TERM").unwrap_or_default(),
                std::env::var_os("WT_SESSION").is_some(),
            );
            info!(protocol = ?proto, error = ?e, "graphics query failed, guessing from environment");
            let mut picker = Picker::halfblocks();
            picker.set_protocol_type(proto);
            picker
        }
    }
}

fn protocol_by_name(name: &str) -> Option<ProtocolType> {
    match name.to_lowercase().as_str() {
        "sixel" => Some(ProtocolType::Sixel),
        "kitty" => Some(ProtocolType::Kitty),
        "iterm2" | "iterm" => Some(ProtocolType::Iterm2),
        "halfblocks" | "half" | "text" => Some(ProtocolType::Halfblocks),
        _ => None,
    }
}

fn guess_from_env(term_program: &str, term: &str, windows_terminal: bool) -> ProtocolType {
    let program = term_program.to_lowercase();
    if program.contains("wezterm") {
        ProtocolType::Sixel
    } else if program.contains("iterm") {
        ProtocolType::Iterm2
    } else if term.contains("xterm-kitty") || program.contains("kitty") || program.contains("ghostty") {
        ProtocolType::Kitty
    } else if windows_terminal {
        ProtocolType::Sixel
    } else {
        ProtocolType::Halfblocks
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_protocol_names() {
        assert_eq!(protocol_by_name("Kitty"), Some(ProtocolType::Kitty));
        assert_eq!(protocol_by_name("half"), Some(ProtocolType::Halfblocks));
        assert_eq!(protocol_by_name("png"), None);
    }

    #[test]
    fn test_env_guess() {
        assert_eq!(guess_from_env("WezTerm", "", false), ProtocolType::Sixel);
        assert_eq!(guess_from_env("", "xterm-kitty", false), ProtocolType::Kitty);
        assert_eq!(guess_from_env("ghostty", "", false), ProtocolType::Kitty);
        assert_eq!(guess_from_env("", "xterm-256color", true), ProtocolType::Sixel);
        assert_eq!(guess_from_env("", "xterm-256color", false), ProtocolType::Halfblocks);
    }
}
