mod calc;
pub mod filter;

pub use calc::{Estimate, estimate};

/// Modified Mercalli style label for log output.
pub fn intensity_label(level: i32) -> &'static str {
    match level {
        i32::MIN..=0 => "0",
        1 => "I",
        2 => "II",
        3 => "III",
        4 => "IV",
        5 => "V",
        6 => "VI",
        7 => "VII",
        8 => "VIII",
        9 => "IX",
        10 => "X",
        11 => "XI",
        _ => "XII",
    }
}
