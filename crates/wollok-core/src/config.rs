//! Tunable limits and the decimal precision used to intern numbers.

/// Runtime tunables. `Default` matches the specification's defaults; embedders
/// construct their own only to shrink the bounds for sandboxing or to change rounding.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Config {
    pub decimal_precision: u32,
    pub max_frame_stack_size: usize,
    pub max_operand_stack_size: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            decimal_precision: 5,
            max_frame_stack_size: 1_000,
            max_operand_stack_size: 10_000,
        }
    }
}
