//! Stroke colours: the fixed swatch palette and CSS-style colour parsing.

use image::Rgba;

/// Swatches offered by the toolbar, in display order.
pub const PALETTE: [&str; 12] = [
    "#FFFFFF", "#EE3333", "#E64980", "#BE4BDB", "#893200", "#228BE6", "#3333EE", "#40C057",
    "#00AA00", "#FAB005", "#FD7E14", "#000000",
];

pub const DEFAULT_COLOR: Rgba<u8> = Rgba([255, 255, 255, 255]);

/// Palette entry `index` as a colour, if the index exists.
pub fn swatch(index: usize) -> Option<Rgba<u8>> {
    PALETTE.get(index).and_then(|hex| parse_color(hex))
}

/// Parses `#RRGGBB`, `#RRGGBBAA`, `rgb(r, g, b)` and `rgba(r, g, b, a)`.
///
/// Alpha in `rgba()` may be a 0..1 fraction or a 0..255 byte.
pub fn parse_color(raw: &str) -> Option<Rgba<u8>> {
    let s = raw.trim();
    if let Some(hex) = s.strip_prefix('#') {
        if !hex.is_ascii() {
            return None;
        }
        let channel = |i: usize| u8::from_str_radix(&hex[i..i + 2], 16).ok();
        return match hex.len() {
            6 => Some(Rgba([channel(0)?, channel(2)?, channel(4)?, 255])),
            8 => Some(Rgba([channel(0)?, channel(2)?, channel(4)?, channel(6)?])),
            _ => None,
        };
    }

    let lower = s.to_ascii_lowercase();
    let (body, with_alpha) = if let Some(body) = lower.strip_prefix("rgba(") {
        (body.strip_suffix(')')?, true)
    } else if let Some(body) = lower.strip_prefix("rgb(") {
        (body.strip_suffix(')')?, false)
    } else {
        return None;
    };

    let parts: Vec<&str> = body.split(',').map(str::trim).collect();
    if parts.len() != if with_alpha { 4 } else { 3 } {
        return None;
    }
    let byte = |part: &str| -> Option<u8> {
        Some(part.parse::<f64>().ok()?.round().clamp(0.0, 255.0) as u8)
    };
    let r = byte(parts[0])?;
    let g = byte(parts[1])?;
    let b = byte(parts[2])?;
    let a = if with_alpha {
        let alpha_value = parts[3].parse::<f64>().ok()?;
        if alpha_value <= 1.0 {
            (alpha_value * 255.0).round().clamp(0.0, 255.0) as u8
        } else {
            alpha_value.round().clamp(0.0, 255.0) as u8
        }
    } else {
        255
    };
    Some(Rgba([r, g, b, a]))
}

pub fn to_hex(color: Rgba<u8>) -> String {
    let [r, g, b, a] = color.0;
    if a == 255 {
        format!("#{r:02X}{g:02X}{b:02X}")
    } else {
        format!("#{r:02X}{g:02X}{b:02X}{a:02X}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_hex_and_functional_forms() {
        assert_eq!(parse_color("#ff3b30"), Some(Rgba([255, 59, 48, 255])));
        assert_eq!(parse_color("#0A84FF80"), Some(Rgba([10, 132, 255, 128])));
        assert_eq!(parse_color("rgb(255, 255, 255)"), Some(DEFAULT_COLOR));
        assert_eq!(parse_color("RGBA(0, 0, 0, 0.5)"), Some(Rgba([0, 0, 0, 128])));
        assert_eq!(parse_color("rgba(1, 2, 3, 200)"), Some(Rgba([1, 2, 3, 200])));
    }

    #[test]
    fn rejects_garbage() {
        assert_eq!(parse_color("#12345"), None);
        assert_eq!(parse_color("rgb(1, 2)"), None);
        assert_eq!(parse_color("teal"), None);
        assert_eq!(parse_color("#ééé"), None);
    }

    #[test]
    fn every_swatch_parses() {
        for index in 0..PALETTE.len() {
            let color = swatch(index).unwrap();
            assert_eq!(to_hex(color), PALETTE[index]);
        }
        assert_eq!(swatch(PALETTE.len()), None);
    }
}
