use crate::logging::LoggingConfig;
use clap::Parser;
use env_logger::WriteStyle;

/// Spinning rabbit, on a monitor or in a headset
#[derive(Parser, Debug, Clone)]
#[command(name = "lepus", author, version)]
pub struct Settings {
    /// Request a VR session as soon as the window is up
    #[arg(long)]
    pub vr: bool,

    /// Initial window size
    #[arg(
        long,
        value_name = "WIDTHxHEIGHT",
        value_parser = parse_size,
        default_value = "300x150"
    )]
    pub size: (u32, u32),

    /// Enable the Khronos validation layer and debug utils
    #[arg(long)]
    pub validation: bool,

    /// Log filter in env_logger syntax; falls back to `RUST_LOG`, then `info`
    #[arg(long, value_name = "FILTER")]
    pub log: Option<String>,

    /// Color log output: auto, always or never
    #[arg(
        long,
        value_name = "WHEN",
        value_parser = parse_color,
        default_value = "auto"
    )]
    pub color: WriteStyle,
}

impl Settings {
    pub fn logging(&self) -> LoggingConfig {
        LoggingConfig {
            filter: self.log.clone(),
            color: self.color,
        }
    }
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            vr: false,
            size: (300, 150),
            validation: false,
            log: None,
            color: WriteStyle::Auto,
        }
    }
}

pub fn parse_color(value: &str) -> Result<WriteStyle, String> {
    match value.trim().to_ascii_lowercase().as_str() {
        "auto" => Ok(WriteStyle::Auto),
        "always" => Ok(WriteStyle::Always),
        "never" => Ok(WriteStyle::Never),
        other => Err(format!("invalid color '{other}'; expected auto, always or never")),
    }
}

pub fn parse_size(value: &str) -> Result<(u32, u32), String> {
    let trimmed = value.trim();
    let (width, height) = trimmed
        .split_once(|c| c == 'x' || c == 'X')
        .ok_or_else(|| format!("invalid size '{trimmed}'; expected WIDTHxHEIGHT"))?;

    let parse = |part: &str| -> Result<u32, String> {
        match part.trim().parse::<u32>() {
            Ok(0) => Err(format!("size '{trimmed}' must not have a zero dimension")),
            Ok(n) => Ok(n),
            Err(_) => Err(format!("invalid dimension '{part}' in size '{trimmed}'")),
        }
    };

    Ok((parse(width)?, parse(height)?))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_sizes() {
        assert_eq!(parse_size("1280x720"), Ok((1280, 720)));
        assert_eq!(parse_size(" 640X480 "), Ok((640, 480)));
    }

    #[test]
    fn rejects_bad_sizes() {
        assert!(parse_size("1280").is_err());
        assert!(parse_size("0x720").is_err());
        assert!(parse_size("axb").is_err());
        assert!(parse_size("-1x2").is_err());
    }

    #[test]
    fn defaults_match_parser() {
        let settings = Settings::try_parse_from(["lepus"]).unwrap();
        assert!(!settings.vr);
        assert!(!settings.validation);
        assert_eq!(settings.size, (300, 150));
        assert_eq!(settings.size, Settings::default().size);
        assert!(settings.log.is_none());
        assert_eq!(settings.logging(), Settings::default().logging());
    }

    #[test]
    fn color_reaches_the_logger() {
        let settings = Settings::try_parse_from(["lepus", "--color", "never"]).unwrap();
        assert_eq!(settings.logging().color, WriteStyle::Never);

        assert_eq!(parse_color("Always"), Ok(WriteStyle::Always));
        assert!(parse_color("sometimes").is_err());
        assert!(Settings::try_parse_from(["lepus", "--color", "blue"]).is_err());
    }

    #[test]
    fn parses_flags() {
        let settings = Settings::try_parse_from([
            "lepus",
            "--vr",
            "--size",
            "800x600",
            "--validation",
            "--log",
            "lepus=debug",
        ])
        .unwrap();
        assert!(settings.vr);
        assert!(settings.validation);
        assert_eq!(settings.size, (800, 600));
        assert_eq!(settings.logging().filter.as_deref(), Some("lepus=debug"));
    }
}
