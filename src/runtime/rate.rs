//! Rate relationships between a block's input and output streams

use super::errors::TopologyError;

/// How many output items a block produces per input item.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub enum Rate {
    /// One output per input
    #[default]
    Sync,
    /// `interpolation` outputs for every `decimation` inputs
    Fixed {
        decimation: usize,
        interpolation: usize,
    },
    /// Arbitrary ratio; the block's forecast decides input requirements
    General { relative_rate: f64 },
}

pub fn gcd(mut a: usize, mut b: usize) -> usize {
    while b != 0 {
        (a, b) = (b, a % b);
    }
    a
}

/// Least common multiple; zero if either argument is zero
pub fn lcm(a: usize, b: usize) -> usize {
    if a == 0 || b == 0 {
        return 0;
    }
    a / gcd(a, b) * b
}

impl Rate {
    pub fn decimating(decimation: usize) -> Self {
        Rate::Fixed {
            decimation,
            interpolation: 1,
        }
    }

    pub fn interpolating(interpolation: usize) -> Self {
        Rate::Fixed {
            decimation: 1,
            interpolation,
        }
    }

    /// Reduced `(decimation, interpolation)` pair, if the rate is exact
    pub fn ratio(&self) -> Option<(usize, usize)> {
        match *self {
            Rate::Sync => Some((1, 1)),
            Rate::Fixed {
                decimation,
                interpolation,
            } => {
                let g = gcd(decimation, interpolation).max(1);
                Some((decimation / g, interpolation / g))
            }
            Rate::General { .. } => None,
        }
    }

    pub fn relative_rate(&self) -> f64 {
        match *self {
            Rate::General { relative_rate } => relative_rate,
            _ => match self.ratio() {
                Some((d, i)) => i as f64 / d as f64,
                None => 1.0,
            },
        }
    }

    pub fn validate(&self, block: &str) -> Result<(), TopologyError> {
        let invalid = |reason: &str| TopologyError::InvalidRate {
            block: block.to_string(),
            reason: reason.to_string(),
        };
        match *self {
            Rate::Sync => Ok(()),
            Rate::Fixed {
                decimation,
                interpolation,
            } => {
                if decimation == 0 || interpolation == 0 {
                    Err(invalid("decimation and interpolation must be non-zero"))
                } else {
                    Ok(())
                }
            }
            Rate::General { relative_rate } => {
                if relative_rate.is_finite() && relative_rate > 0.0 {
                    Ok(())
                } else {
                    Err(invalid("relative rate must be finite and positive"))
                }
            }
        }
    }

    /// Output multiple actually enforced: a fixed-rate block only produces
    /// whole interpolation groups.
    pub fn effective_output_multiple(&self, output_multiple: usize) -> usize {
        let multiple = output_multiple.max(1);
        match self.ratio() {
            Some((_, interpolation)) => lcm(multiple, interpolation),
            None => multiple,
        }
    }

    /// Largest producible output for `ninput` items, rounded down to `multiple`.
    ///
    /// Only meaningful for exact rates.
    pub fn output_for_input(&self, ninput: usize, multiple: usize) -> usize {
        let (d, i) = self.ratio().unwrap_or((1, 1));
        let raw = (ninput as u128 * i as u128 / d as u128).min(usize::MAX as u128) as usize;
        round_down(raw, multiple)
    }

    /// Inputs consumed when producing `noutput` items at an exact rate
    pub fn input_for_output(&self, noutput: usize) -> usize {
        let (d, i) = self.ratio().unwrap_or((1, 1));
        (noutput as u128 * d as u128 / i as u128) as usize
    }

    /// Default input requirement for `noutput` outputs with `history` look-behind
    pub fn forecast(&self, noutput: usize, history: usize) -> usize {
        let base = match self.ratio() {
            Some(_) => self.input_for_output(noutput),
            None => (noutput as f64 / self.relative_rate()).ceil() as usize,
        };
        base + history.max(1) - 1
    }

    /// Map an input offset (relative to the stream start) to the output stream
    pub fn propagate_offset(&self, offset: u64) -> u64 {
        match self.ratio() {
            Some((d, i)) => (offset as u128 * i as u128 / d as u128) as u64,
            None => (offset as f64 * self.relative_rate()).round() as u64,
        }
    }
}

pub(crate) fn round_down(n: usize, multiple: usize) -> usize {
    let multiple = multiple.max(1);
    n - n % multiple
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_fixed_rate_algebra() {
        let decim = Rate::decimating(4);
        assert_eq!(decim.output_for_input(4000, 1), 1000);
        assert_eq!(decim.output_for_input(7, 1), 1);
        assert_eq!(decim.input_for_output(1000), 4000);
        assert_eq!(decim.forecast(10, 3), 42);

        let interp = Rate::interpolating(3);
        assert_eq!(interp.effective_output_multiple(2), 6);
        assert_eq!(interp.output_for_input(5, 6), 12);
        assert_eq!(interp.input_for_output(12), 4);
    }

    #[test]
    fn test_ratio_is_reduced() {
        let rate = Rate::Fixed {
            decimation: 6,
            interpolation: 4,
        };
        assert_eq!(rate.ratio(), Some((3, 2)));
        assert!((rate.relative_rate() - 2.0 / 3.0).abs() < 1e-12);
    }

    #[test]
    fn test_general_rate() {
        let rate = Rate::General { relative_rate: 0.25 };
        assert_eq!(rate.forecast(10, 1), 40);
        assert_eq!(rate.propagate_offset(8), 2);
        assert!(rate.validate("b").is_ok());
        assert!(Rate::General { relative_rate: 0.0 }.validate("b").is_err());
        assert!(Rate::decimating(0).validate("b").is_err());
    }

    #[test]
    fn test_offset_propagation() {
        assert_eq!(Rate::decimating(4).propagate_offset(9), 2);
        assert_eq!(Rate::interpolating(3).propagate_offset(5), 15);
        assert_eq!(Rate::Sync.propagate_offset(42), 42);
    }

    #[test]
    fn test_gcd_lcm() {
        assert_eq!(gcd(12, 18), 6);
        assert_eq!(lcm(4, 6), 12);
        assert_eq!(lcm(0, 6), 0);
    }

    proptest! {
        #[test]
        fn prop_consumption_never_exceeds_input(
            d in 1usize..16,
            i in 1usize..16,
            m in 1usize..8,
            ninput in 0usize..10_000,
        ) {
            let rate = Rate::Fixed { decimation: d, interpolation: i };
            let multiple = rate.effective_output_multiple(m);
            let noutput = rate.output_for_input(ninput, multiple);
            prop_assert_eq!(noutput % multiple, 0);
            prop_assert!(rate.input_for_output(noutput) <= ninput);
            // One more multiple would overrun the input
            prop_assert!(rate.input_for_output(noutput + multiple) > ninput);
        }
    }
}
