use std::collections::VecDeque;

/// Rolling window of observed gas prices that smooths the underprice floor.
///
/// The oracle's suggested price jitters block to block; accepting a tx at
/// one instant and rejecting its sibling a second later would thrash the
/// pool, so the floor is the minimum over the configured window.
#[derive(Debug)]
pub struct GasPriceCalculator {
    window: VecDeque<(u64, u128)>,
    window_sec: u64,
}

impl GasPriceCalculator {
    pub fn new(window_min: u64) -> Self {
        Self {
            window: VecDeque::new(),
            window_sec: window_min * 60,
        }
    }

    /// Records one observation and drops everything that fell out of the
    /// window.
    pub fn observe(&mut self, now: u64, gas_price: u128) {
        self.window.push_back((now, gas_price));
        let cutoff = now.saturating_sub(self.window_sec);
        while let Some((ts, _)) = self.window.front() {
            if *ts < cutoff {
                self.window.pop_front();
            } else {
                break;
            }
        }
    }

    /// The current underprice floor; zero until the first observation.
    pub fn min_executable_gas_price(&self) -> u128 {
        self.window
            .iter()
            .map(|(_, price)| *price)
            .min()
            .unwrap_or(0)
    }

    /// Latest suggested price for `eth_gasPrice`.
    pub fn suggested_gas_price(&self) -> u128 {
        self.window.back().map(|(_, price)| *price).unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn floor_is_the_window_minimum() {
        let mut calc = GasPriceCalculator::new(1);
        calc.observe(0, 100);
        calc.observe(10, 80);
        calc.observe(20, 120);
        assert_eq!(calc.min_executable_gas_price(), 80);
        assert_eq!(calc.suggested_gas_price(), 120);
    }

    #[test]
    fn old_observations_fall_out() {
        let mut calc = GasPriceCalculator::new(1);
        calc.observe(0, 10);
        calc.observe(100, 200);
        // the 10 at t=0 is outside the 60 s window by t=100
        assert_eq!(calc.min_executable_gas_price(), 200);
    }

    #[test]
    fn empty_window_floors_at_zero() {
        let calc = GasPriceCalculator::new(5);
        assert_eq!(calc.min_executable_gas_price(), 0);
    }
}
