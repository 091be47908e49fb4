//! Affine brightness model `I' = exp(a)·I + b`.

/// Relative brightness transfer between two frames.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct AffineBrightness {
    /// Log-gain.
    pub a: f64,
    /// Offset.
    pub b: f64,
}

impl AffineBrightness {
    pub fn new(a: f64, b: f64) -> Self {
        Self { a, b }
    }

    /// Coarse guess from the exposure times of both frames.
    ///
    /// Returns `None` unless both exposures are positive.
    pub fn from_exposures(reference: f64, new: f64) -> Option<Self> {
        if reference > 0.0 && new > 0.0 {
            Some(Self::new((new / reference).ln(), 0.0))
        } else {
            None
        }
    }

    #[inline]
    pub fn gain(&self) -> f64 {
        self.a.exp()
    }

    #[inline]
    pub fn apply(&self, intensity: f64) -> f64 {
        self.gain() * intensity + self.b
    }

    /// Additive update of both parameters.
    pub fn with_increment(&self, da: f64, db: f64) -> Self {
        Self::new(self.a + da, self.b + db)
    }
}
