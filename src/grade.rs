//! Grade buckets for guild totals. Thresholds are inclusive lower bounds.

use std::fmt;

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum Grade {
    F,
    D,
    C,
    B,
    A,
    S,
    SS,
    SSS,
    EX,
    ExPlus,
}

impl Grade {
    pub fn label(self) -> &'static str {
        match self {
            Grade::ExPlus => "EX+",
            Grade::EX => "EX",
            Grade::SSS => "SSS",
            Grade::SS => "SS",
            Grade::S => "S",
            Grade::A => "A",
            Grade::B => "B",
            Grade::C => "C",
            Grade::D => "D",
            Grade::F => "F",
        }
    }

    /// Hex color, `#RRGGBB`.
    pub fn color(self) -> &'static str {
        match self {
            Grade::ExPlus => "#FF1493",
            Grade::EX => "#4169E1",
            Grade::SSS => "#8B7355",
            Grade::SS => "#B8860B",
            Grade::S => "#8B0000",
            Grade::A => "#4B0082",
            Grade::B => "#2F4F4F",
            Grade::C => "#006400",
            Grade::D => "#4A5568",
            Grade::F => "#8B4513",
        }
    }

    /// Color as the integer Discord embeds expect.
    pub fn color_value(self) -> u32 {
        u32::from_str_radix(self.color().trim_start_matches('#'), 16).unwrap_or(0)
    }
}

impl fmt::Display for Grade {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

const CASTLE_RUSH: [(i64, Grade); 9] = [
    (100_000_000, Grade::ExPlus),
    (75_000_000, Grade::EX),
    (50_000_000, Grade::SSS),
    (30_000_000, Grade::SS),
    (15_000_000, Grade::S),
    (10_000_000, Grade::A),
    (7_500_000, Grade::B),
    (5_000_000, Grade::C),
    (2_500_000, Grade::D),
];

const ADVENT: [(i64, Grade); 9] = [
    (400_000_000, Grade::ExPlus),
    (300_000_000, Grade::EX),
    (200_000_000, Grade::SSS),
    (150_000_000, Grade::SS),
    (100_000_000, Grade::S),
    (75_000_000, Grade::A),
    (50_000_000, Grade::B),
    (25_000_000, Grade::C),
    (10_000_000, Grade::D),
];

fn lookup(table: &[(i64, Grade)], score: i64) -> Grade {
    table
        .iter()
        .find(|(floor, _)| score >= *floor)
        .map(|(_, grade)| *grade)
        .unwrap_or(Grade::F)
}

pub fn castle_rush_grade(total: i64) -> Grade {
    lookup(&CASTLE_RUSH, total)
}

pub fn advent_grade(total: i64) -> Grade {
    lookup(&ADVENT, total)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_castle_rush_boundaries() {
        assert_eq!(castle_rush_grade(100_000_000), Grade::ExPlus);
        assert_eq!(castle_rush_grade(99_999_999), Grade::EX);
        assert_eq!(castle_rush_grade(7_500_000), Grade::B);
        assert_eq!(castle_rush_grade(2_499_999), Grade::F);
        assert_eq!(castle_rush_grade(0), Grade::F);
    }

    #[test]
    fn test_advent_scale_is_larger() {
        assert_eq!(advent_grade(15_000_000), Grade::D);
        assert_eq!(castle_rush_grade(15_000_000), Grade::S);
        assert_eq!(advent_grade(400_000_000), Grade::ExPlus);
        assert_eq!(advent_grade(9_999_999), Grade::F);
    }

    #[test]
    fn test_color_value_parses_hex() {
        assert_eq!(Grade::ExPlus.color_value(), 0xFF1493);
        assert_eq!(Grade::F.label(), "F");
    }
}
