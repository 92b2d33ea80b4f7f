use crate::error::{Result, WorkloadError};
use rand::Rng;

/// Catalog size used by benign generators unless configured otherwise.
pub const DEFAULT_CATALOG_SIZE: u32 = 1000;

/// Zipf-Mandelbrot content popularity over items `1..=N`.
///
/// Item `i` has relative weight `1 / (i + q)^s`. The model keeps the normalized
/// cumulative distribution and maps a uniform draw to an item by inverse-transform
/// sampling.
#[derive(Debug, Clone, PartialEq)]
pub struct PopularityModel {
    item_count: u32,
    skew_exponent: f64,
    shift_parameter: f64,
    /// `cumulative[0] == 0`, `cumulative[N] == 1`, non-decreasing.
    cumulative: Vec<f64>,
}

impl PopularityModel {
    pub fn new(item_count: u32, skew_exponent: f64, shift_parameter: f64) -> Result<Self> {
        let mut model = Self {
            item_count: 0,
            skew_exponent: 0.0,
            shift_parameter: 0.0,
            cumulative: Vec::new(),
        };
        model.configure(item_count, skew_exponent, shift_parameter)?;
        Ok(model)
    }

    /// Rebuild the cumulative table from scratch. On error the previous table is kept.
    pub fn configure(
        &mut self,
        item_count: u32,
        skew_exponent: f64,
        shift_parameter: f64,
    ) -> Result<()> {
        if item_count == 0 {
            return Err(WorkloadError::InvalidParameter(
                "catalog must contain at least one item".into(),
            ));
        }
        if !skew_exponent.is_finite() || skew_exponent < 0.0 {
            return Err(WorkloadError::InvalidParameter(format!(
                "skew exponent must be a non-negative number, got {skew_exponent}"
            )));
        }
        if !shift_parameter.is_finite() || shift_parameter < 0.0 {
            return Err(WorkloadError::InvalidParameter(format!(
                "shift parameter must be a non-negative number, got {shift_parameter}"
            )));
        }

        let n = item_count as usize;
        let mut cumulative = Vec::with_capacity(n + 1);
        cumulative.push(0.0);
        let mut running = 0.0;
        for i in 1..=n {
            running += 1.0 / (i as f64 + shift_parameter).powf(skew_exponent);
            cumulative.push(running);
        }
        let total = cumulative[n];
        if !total.is_finite() || total <= 0.0 {
            return Err(WorkloadError::InvalidParameter(format!(
                "popularity weights do not normalize (total {total})"
            )));
        }
        for value in cumulative.iter_mut().skip(1) {
            *value /= total;
        }

        self.item_count = item_count;
        self.skew_exponent = skew_exponent;
        self.shift_parameter = shift_parameter;
        self.cumulative = cumulative;
        Ok(())
    }

    /// Map a uniform draw in `(0, 1]` to an item index in `1..=N`.
    ///
    /// Returns the first `i` with `u <= cumulative[i]`. A draw above every entry
    /// (rounding left `cumulative[N]` just below `u`) selects `N`.
    pub fn sample(&self, uniform_draw: f64) -> u32 {
        // The table is sorted, so the first index satisfying the bound is the
        // partition point of `cumulative[i] < u` over 1..=N.
        let offset = self.cumulative[1..].partition_point(|&c| c < uniform_draw);
        if offset >= self.item_count as usize {
            self.item_count
        } else {
            offset as u32 + 1
        }
    }

    /// Draw from `rng` and sample, re-drawing on an exact zero.
    pub fn sample_with<R: Rng + ?Sized>(&self, rng: &mut R) -> u32 {
        self.sample(draw_unit_interval(rng))
    }

    /// Probability mass of a single item. Zero outside `1..=N`.
    pub fn probability(&self, index: u32) -> f64 {
        if index == 0 || index > self.item_count {
            return 0.0;
        }
        let i = index as usize;
        self.cumulative[i] - self.cumulative[i - 1]
    }

    pub fn item_count(&self) -> u32 {
        self.item_count
    }

    pub fn skew_exponent(&self) -> f64 {
        self.skew_exponent
    }

    pub fn shift_parameter(&self) -> f64 {
        self.shift_parameter
    }

    pub fn cumulative(&self) -> &[f64] {
        &self.cumulative
    }
}

/// Uniform draw in `(0, 1)`. A zero draw maps to no meaningful item, so it is drawn again.
pub fn draw_unit_interval<R: Rng + ?Sized>(rng: &mut R) -> f64 {
    loop {
        let u: f64 = rng.gen();
        if u > 0.0 {
            return u;
        }
    }
}
