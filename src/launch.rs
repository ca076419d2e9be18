use crate::grid::SeriesFilter;
use crate::signing::{DEFAULT_SLICE_QUALITY, DEFAULT_SLICE_WIDTH};
use crate::slices::VoxelSpacing;

pub const DEFAULT_BACKEND_URL: &str = "http://localhost:5000";
const BACKEND_URL_ENV: &str = "ORTHOVIEW_BACKEND_URL";
const SIGNING_SECRET_ENV: &str = "ORTHOVIEW_SIGNING_SECRET";

#[derive(Debug, Clone, PartialEq)]
pub struct LaunchConfig {
    pub backend_url: String,
    pub signing_secret: Option<String>,
    pub width: u32,
    pub quality: u8,
    pub voxel_spacing: Option<VoxelSpacing>,
    pub series: Option<SeriesFilter>,
    pub entity: Option<String>,
    /// Fetch every slice up front; when off, only slices on screen are requested.
    pub prefetch: bool,
}

impl Default for LaunchConfig {
    fn default() -> Self {
        Self {
            backend_url: DEFAULT_BACKEND_URL.to_string(),
            signing_secret: None,
            width: DEFAULT_SLICE_WIDTH,
            quality: DEFAULT_SLICE_QUALITY,
            voxel_spacing: None,
            series: None,
            entity: None,
            prefetch: true,
        }
    }
}

/// Values supplied by one launch source; unset fields fall through to the next source.
#[derive(Debug, Clone, Default, PartialEq)]
struct LaunchOverrides {
    backend_url: Option<String>,
    signing_secret: Option<String>,
    width: Option<u32>,
    quality: Option<u8>,
    voxel_spacing: Option<VoxelSpacing>,
    series: Option<SeriesFilter>,
    entity: Option<String>,
    prefetch: Option<bool>,
}

impl LaunchOverrides {
    fn or(self, fallback: LaunchOverrides) -> LaunchOverrides {
        LaunchOverrides {
            backend_url: self.backend_url.or(fallback.backend_url),
            signing_secret: self.signing_secret.or(fallback.signing_secret),
            width: self.width.or(fallback.width),
            quality: self.quality.or(fallback.quality),
            voxel_spacing: self.voxel_spacing.or(fallback.voxel_spacing),
            series: self.series.or(fallback.series),
            entity: self.entity.or(fallback.entity),
            prefetch: self.prefetch.or(fallback.prefetch),
        }
    }

    fn into_config(self) -> LaunchConfig {
        let defaults = LaunchConfig::default();
        LaunchConfig {
            backend_url: self.backend_url.unwrap_or(defaults.backend_url),
            signing_secret: self.signing_secret,
            width: self.width.unwrap_or(defaults.width),
            quality: self.quality.unwrap_or(defaults.quality),
            voxel_spacing: self.voxel_spacing,
            series: self.series,
            entity: self.entity,
            prefetch: self.prefetch.unwrap_or(defaults.prefetch),
        }
    }

    fn apply(&mut self, key: &str, value: &str) -> Result<(), String> {
        let value = value.trim();
        match key {
            "backend" | "backend_url" | "base_url" | "api" => {
                if !value.is_empty() {
                    self.backend_url = Some(value.to_string());
                }
            }
            "secret" | "signing_secret" | "token" => {
                if !value.is_empty() {
                    self.signing_secret = Some(value.to_string());
                }
            }
            "w" | "width" => self.width = Some(parse_width(value)?),
            "q" | "quality" => self.quality = Some(parse_quality(value)?),
            "spacing" | "voxel_spacing" => self.voxel_spacing = Some(parse_spacing(value)?),
            "series" | "view" => {
                let series = SeriesFilter::parse(value).ok_or_else(|| {
                    format!("Unknown series '{value}'. Use axial, coronal, sagittal, or all.")
                })?;
                self.series = Some(series);
            }
            "entity" | "tooth" => {
                if !value.is_empty() {
                    self.entity = Some(value.to_string());
                }
            }
            "prefetch" => self.prefetch = Some(parse_switch(value)?),
            _ => return Err(format!("Unknown launch parameter '{key}'.")),
        }
        Ok(())
    }
}

pub fn parse_launch_config_from_args(args: &[String]) -> Result<LaunchConfig, String> {
    parse_launch_config(args, |key| std::env::var(key).ok())
}

/// Merges launch URI, CLI flags, and environment, in that order of precedence.
pub fn parse_launch_config(
    args: &[String],
    env: impl Fn(&str) -> Option<String>,
) -> Result<LaunchConfig, String> {
    let mut from_uri = LaunchOverrides::default();
    let mut from_flags = LaunchOverrides::default();

    let mut index = 0;
    while index < args.len() {
        let arg = args[index].as_str();
        if is_orthoview_uri(arg) {
            from_uri = parse_orthoview_uri(arg)?;
            index += 1;
            continue;
        }

        let Some(flag) = arg.strip_prefix("--") else {
            return Err(format!("Unexpected argument '{arg}'."));
        };
        let (key, value) = match flag.split_once('=') {
            Some((key, value)) => (key, value.to_string()),
            None => {
                index += 1;
                let value = args
                    .get(index)
                    .ok_or_else(|| format!("Missing value after --{flag}."))?;
                (flag, value.clone())
            }
        };
        from_flags.apply(&key.to_ascii_lowercase(), &value)?;
        index += 1;
    }

    let from_env = LaunchOverrides {
        backend_url: env(BACKEND_URL_ENV).filter(|value| !value.trim().is_empty()),
        signing_secret: env(SIGNING_SECRET_ENV).filter(|value| !value.trim().is_empty()),
        ..LaunchOverrides::default()
    };

    Ok(from_uri.or(from_flags).or(from_env).into_config())
}

fn parse_orthoview_uri(uri: &str) -> Result<LaunchOverrides, String> {
    let rest = strip_orthoview_scheme(uri)
        .ok_or_else(|| "URL must start with orthoview://".to_string())?;
    let (location, query) = rest.split_once('?').unwrap_or((rest, ""));
    let location = location.trim().trim_end_matches('/');
    if !location.is_empty() && !location.eq_ignore_ascii_case("open") {
        return Err(format!("Unsupported launch action '{location}'."));
    }

    let mut overrides = LaunchOverrides::default();
    for pair in query.split('&') {
        if pair.is_empty() {
            continue;
        }
        let (key, value) = pair.split_once('=').unwrap_or((pair, ""));
        let key = key.trim().to_ascii_lowercase();
        let decoded_value = percent_decode(value)?;
        overrides.apply(&key, &decoded_value)?;
    }
    Ok(overrides)
}

fn is_orthoview_uri(value: &str) -> bool {
    strip_orthoview_scheme(value).is_some()
}

fn strip_orthoview_scheme(uri: &str) -> Option<&str> {
    let prefix = "orthoview://";
    if uri.len() >= prefix.len() && uri[..prefix.len()].eq_ignore_ascii_case(prefix) {
        Some(&uri[prefix.len()..])
    } else {
        None
    }
}

fn parse_width(value: &str) -> Result<u32, String> {
    match value.parse::<u32>() {
        Ok(width) if width > 0 => Ok(width),
        _ => Err(format!("Width must be a positive integer (got '{value}').")),
    }
}

fn parse_quality(value: &str) -> Result<u8, String> {
    match value.parse::<u8>() {
        Ok(quality) if (1..=100).contains(&quality) => Ok(quality),
        _ => Err(format!("Quality must be within 1..=100 (got '{value}').")),
    }
}

fn parse_switch(value: &str) -> Result<bool, String> {
    match value.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(format!("Expected true or false (got '{value}').")),
    }
}

fn parse_spacing(value: &str) -> Result<VoxelSpacing, String> {
    let parts = value
        .split(',')
        .map(|part| part.trim().parse::<f32>())
        .collect::<Result<Vec<_>, _>>()
        .map_err(|_| format!("Spacing must be three numbers x,y,z (got '{value}')."))?;
    let [x, y, z] = parts[..] else {
        return Err(format!("Spacing must be three numbers x,y,z (got '{value}')."));
    };
    if [x, y, z].iter().any(|mm| !mm.is_finite() || *mm <= 0.0) {
        return Err("Spacing values must be positive millimetres.".to_string());
    }
    Ok(VoxelSpacing {
        x_spacing_mm: x,
        y_spacing_mm: y,
        z_spacing_mm: z,
    })
}

fn percent_decode(value: &str) -> Result<String, String> {
    let bytes = value.as_bytes();
    let mut decoded = Vec::with_capacity(bytes.len());
    let mut index = 0;
    while index < bytes.len() {
        match bytes[index] {
            b'+' => {
                decoded.push(b' ');
                index += 1;
            }
            b'%' => {
                if index + 2 >= bytes.len() {
                    return Err("Invalid percent-encoding in URL.".to_string());
                }
                let hi = decode_hex_digit(bytes[index + 1])
                    .ok_or_else(|| "Invalid percent-encoding in URL.".to_string())?;
                let lo = decode_hex_digit(bytes[index + 2])
                    .ok_or_else(|| "Invalid percent-encoding in URL.".to_string())?;
                decoded.push((hi << 4) | lo);
                index += 3;
            }
            byte => {
                decoded.push(byte);
                index += 1;
            }
        }
    }

    String::from_utf8(decoded).map_err(|_| "URL contains invalid UTF-8 after decoding.".to_string())
}

fn decode_hex_digit(value: u8) -> Option<u8> {
    match value {
        b'0'..=b'9' => Some(value - b'0'),
        b'a'..=b'f' => Some(value - b'a' + 10),
        b'A'..=b'F' => Some(value - b'A' + 10),
        _ => None,
    }
}
