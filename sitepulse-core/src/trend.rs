//! Period-over-period trend comparison
//!
//! Pure, storage-free: takes two totals and emits a directional signal for
//! report rendering.

/// Direction of a trend, also used as the rendering color key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TrendDirection {
    Up,
    Down,
    Flat,
}

impl TrendDirection {
    pub fn as_str(&self) -> &'static str {
        match self {
            TrendDirection::Up => "up",
            TrendDirection::Down => "down",
            TrendDirection::Flat => "flat",
        }
    }
}

/// A rendered trend signal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Trend {
    /// ▲ ▼ ■
    pub symbol: &'static str,
    /// "50.0%" for percentage moves, "+12" for moves off a zero base, "0" flat
    pub text: String,
    pub direction: TrendDirection,
}

/// Compare a period total against the previous period's.
///
/// A zero (or negative) previous total makes a percentage undefined, so a
/// rise off zero is described as an absolute increase instead.
pub fn trend(current: i64, previous: i64) -> Trend {
    if previous <= 0 {
        if current <= 0 {
            return flat();
        }
        return Trend {
            symbol: "▲",
            text: format!("+{}", current),
            direction: TrendDirection::Up,
        };
    }

    let delta = current - previous;
    if delta == 0 {
        return flat();
    }

    let pct = (delta.unsigned_abs() as f64) / (previous as f64) * 100.0;
    if delta > 0 {
        Trend {
            symbol: "▲",
            text: format!("{:.1}%", pct),
            direction: TrendDirection::Up,
        }
    } else {
        Trend {
            symbol: "▼",
            text: format!("{:.1}%", pct),
            direction: TrendDirection::Down,
        }
    }
}

fn flat() -> Trend {
    Trend {
        symbol: "■",
        text: "0".to_string(),
        direction: TrendDirection::Flat,
    }
}
