//! Autocovariance sequences and vector autoregressive models.
use nalgebra::DMatrix;
use num_complex::Complex64;
use rustfft::FftPlanner;

use super::spectral::CrossSpectrum;
use crate::error::MIError;

/// Autocovariance sequence Γ_0, ..., Γ_p of a multivariate stationary process, with
/// Γ_l = E[x_t x_{t-l}ᵀ].
#[derive(Debug, PartialEq, Clone)]
pub struct Autocovariance {
    lags: Vec<DMatrix<f64>>,
}

impl Autocovariance {
    pub fn new(lags: Vec<DMatrix<f64>>) -> Result<Self, MIError> {
        let n = lags.first().map(|g| g.nrows()).ok_or_else(|| {
            MIError::InvalidParameter("an autocovariance needs at least lag 0".to_string())
        })?;
        if lags.iter().any(|g| g.nrows() != n || g.ncols() != n) {
            return Err(MIError::IncompatibleData(
                "autocovariance matrices must all be square of the same size".to_string(),
            ));
        }
        Ok(Autocovariance { lags })
    }

    /// The autocovariance up to `n_lags` lags at one time point of a cross-spectrum, by inverse
    /// Fourier transform of the spectrum extended to negative frequencies.
    ///
    /// The frequencies of the spectrum are taken as the regular grid 0, ..., Nyquist. The number
    /// of lags must be positive and smaller than the number of frequencies minus one.
    pub fn from_csd(csd: &CrossSpectrum, time: usize, n_lags: usize) -> Result<Self, MIError> {
        let n_freqs = csd.n_freqs();
        if n_lags == 0 || n_lags >= n_freqs - 1 {
            return Err(MIError::InvalidParameter(format!(
                "the number of lags ({}) must be positive and smaller than {}",
                n_lags,
                n_freqs - 1
            )));
        }
        if time >= csd.n_times() {
            return Err(MIError::InvalidParameter(format!(
                "time point {} does not exist",
                time
            )));
        }
        let n = csd.n_signals();
        let n_fft = 2 * (n_freqs - 1);
        let ifft = FftPlanner::<f64>::new().plan_fft_inverse(n_fft);

        let mut lags = vec![DMatrix::<f64>::zeros(n, n); n_lags + 1];
        let mut buf = vec![Complex64::default(); n_fft];
        for i in 0..n {
            for j in 0..n {
                for k in 0..n_freqs {
                    buf[k] = csd.at(time, k)[(i, j)];
                }
                for k in 1..n_freqs - 1 {
                    buf[n_fft - k] = buf[k].conj();
                }
                ifft.process(&mut buf);
                for (l, gamma) in lags.iter_mut().enumerate() {
                    gamma[(i, j)] = buf[l].re / n_fft as f64;
                }
            }
        }
        Ok(Autocovariance { lags })
    }

    pub fn n_lags(&self) -> usize {
        self.lags.len() - 1
    }

    pub fn n_signals(&self) -> usize {
        self.lags[0].nrows()
    }

    pub fn lag(&self, l: usize) -> &DMatrix<f64> {
        &self.lags[l]
    }

    /// The autocovariance of the time-reversed process, Γ_l → Γ_lᵀ.
    pub fn time_reversed(&self) -> Autocovariance {
        Autocovariance {
            lags: self.lags.iter().map(|g| g.transpose()).collect(),
        }
    }

    /// Γ_l for any signed lag, with Γ_{-l} = Γ_lᵀ.
    fn signed_lag(&self, l: i64) -> DMatrix<f64> {
        match l >= 0 {
            true => self.lags[l as usize].clone(),
            false => self.lags[(-l) as usize].transpose(),
        }
    }
}

/// Vector autoregressive model x_t = Σ_l A_l x_{t-l} + e_t with residual covariance Σ.
#[derive(Debug, PartialEq, Clone)]
pub struct VarModel {
    coefs: Vec<DMatrix<f64>>,
    residual_cov: DMatrix<f64>,
}

impl VarModel {
    /// Fit the model to an autocovariance sequence by solving the Yule-Walker equations.
    /// The function returns an error if the equations are singular or the residual covariance
    /// is not positive definite.
    pub fn fit(autocov: &Autocovariance) -> Result<Self, MIError> {
        let n = autocov.n_signals();
        let p = autocov.n_lags();

        let mut r = DMatrix::<f64>::zeros(n * p, n * p);
        let mut g = DMatrix::<f64>::zeros(n, n * p);
        for k in 0..p {
            for j in 0..p {
                r.view_mut((k * n, j * n), (n, n))
                    .copy_from(&autocov.signed_lag(j as i64 - k as i64));
            }
            g.view_mut((0, k * n), (n, n)).copy_from(autocov.lag(k + 1));
        }

        // A R = G  <=>  Rᵀ Aᵀ = Gᵀ
        let a_t = r
            .transpose()
            .lu()
            .solve(&g.transpose())
            .ok_or_else(|| {
                MIError::NumericalError(
                    "singular Yule-Walker equations, the data is rank deficient".to_string(),
                )
            })?;
        if a_t.iter().any(|v| !v.is_finite()) {
            return Err(MIError::NumericalError(
                "non-finite autoregressive coefficients".to_string(),
            ));
        }
        let a = a_t.transpose();
        let coefs: Vec<DMatrix<f64>> = (0..p)
            .map(|k| a.columns(k * n, n).into_owned())
            .collect();

        let mut sigma = autocov.lag(0).clone();
        for (k, coef) in coefs.iter().enumerate() {
            sigma -= coef * autocov.lag(k + 1).transpose();
        }
        let sigma = (&sigma + sigma.transpose()) * 0.5;
        if sigma.clone().cholesky().is_none() {
            return Err(MIError::NumericalError(
                "the residual covariance is not positive definite".to_string(),
            ));
        }

        Ok(VarModel {
            coefs,
            residual_cov: sigma,
        })
    }

    pub fn coefs(&self) -> &[DMatrix<f64>] {
        &self.coefs
    }

    pub fn residual_cov(&self) -> &DMatrix<f64> {
        &self.residual_cov
    }

    pub fn n_signals(&self) -> usize {
        self.residual_cov.nrows()
    }

    /// The transfer function H(ω) = (I - Σ_l A_l e^{-iωl})⁻¹ at the normalized angular
    /// frequency ω (π is the Nyquist frequency).
    pub fn transfer(&self, omega: f64) -> Result<DMatrix<Complex64>, MIError> {
        let n = self.n_signals();
        let mut m = DMatrix::<Complex64>::identity(n, n);
        for (l, coef) in self.coefs.iter().enumerate() {
            let phase = Complex64::from_polar(1.0, -omega * (l + 1) as f64);
            m -= coef.map(|v| Complex64::new(v, 0.0)) * phase;
        }
        m.try_inverse().ok_or_else(|| {
            MIError::NumericalError(format!("singular transfer function at ω = {}", omega))
        })
    }

    /// The spectral density S(ω) = H Σ Hᴴ implied by the model.
    pub fn spectral_density(&self, omega: f64) -> Result<DMatrix<Complex64>, MIError> {
        let h = self.transfer(omega)?;
        let sigma = self.residual_cov.map(|v| Complex64::new(v, 0.0));
        Ok(&h * sigma * h.adjoint())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connectivity::spectral::SpectralEstimator;
    use approx::assert_relative_eq;
    use nalgebra::DVector;
    use rand::rngs::StdRng;
    use rand::SeedableRng;
    use rand_distr::{Distribution, Normal};

    /// Bivariate AR(1) process x_t = A x_{t-1} + e_t.
    fn ar1_epochs(a: &DMatrix<f64>, n_epochs: usize, n_times: usize) -> Vec<DMatrix<f64>> {
        let mut rng = StdRng::seed_from_u64(42);
        let normal = Normal::new(0.0, 1.0).unwrap();
        (0..n_epochs)
            .map(|_| {
                let mut data = DMatrix::zeros(2, n_times + 100);
                for t in 1..n_times + 100 {
                    let prev = data.column(t - 1).into_owned();
                    let next = a * prev + DVector::from_fn(2, |_, _| normal.sample(&mut rng));
                    data.column_mut(t).copy_from(&next);
                }
                data.columns(100, n_times).into_owned()
            })
            .collect()
    }

    #[test]
    fn test_from_csd_lag_zero_is_covariance() {
        let a = DMatrix::from_row_slice(2, 2, &[0.5, 0.0, 0.4, 0.3]);
        let epochs = ar1_epochs(&a, 50, 256);
        let csd = SpectralEstimator::fourier(1.0, 256)
            .unwrap()
            .csd(&epochs, 100, 1)
            .unwrap();
        let autocov = Autocovariance::from_csd(&csd, 0, 5).unwrap();

        let mut cov = DMatrix::<f64>::zeros(2, 2);
        for epoch in epochs.iter() {
            let centered = crate::connectivity::spectral::demean(epoch);
            cov += &centered * centered.transpose() / 256.0;
        }
        cov /= 50.0;
        for i in 0..2 {
            for j in 0..2 {
                assert_relative_eq!(autocov.lag(0)[(i, j)], cov[(i, j)], epsilon = 1e-9);
            }
        }
    }

    #[test]
    fn test_fit_recovers_coefficients() {
        let a = DMatrix::from_row_slice(2, 2, &[0.5, 0.0, 0.4, 0.3]);
        let epochs = ar1_epochs(&a, 100, 512);
        let csd = SpectralEstimator::fourier(1.0, 512)
            .unwrap()
            .csd(&epochs, 100, 2)
            .unwrap();
        let autocov = Autocovariance::from_csd(&csd, 0, 3).unwrap();
        let model = VarModel::fit(&autocov).unwrap();
        for i in 0..2 {
            for j in 0..2 {
                assert!((model.coefs()[0][(i, j)] - a[(i, j)]).abs() < 0.05);
            }
        }
        assert_relative_eq!(model.residual_cov()[(0, 0)], 1.0, epsilon = 0.1);
    }

    #[test]
    fn test_time_reversal_is_involution() {
        let lags = vec![
            DMatrix::from_row_slice(2, 2, &[2.0, 0.5, 0.5, 1.0]),
            DMatrix::from_row_slice(2, 2, &[0.8, 0.1, 0.6, 0.3]),
        ];
        let autocov = Autocovariance::new(lags).unwrap();
        let reversed = autocov.time_reversed();
        assert_eq!(reversed.lag(1), &autocov.lag(1).transpose());
        assert_eq!(reversed.time_reversed(), autocov);
    }

    #[test]
    fn test_invalid_lags() {
        let est = SpectralEstimator::fourier(1.0, 16).unwrap();
        let epochs = vec![DMatrix::from_fn(1, 16, |_, t| (t as f64).sin())];
        let csd = est.csd(&epochs, 1, 1).unwrap();
        assert!(matches!(
            Autocovariance::from_csd(&csd, 0, 0),
            Err(MIError::InvalidParameter(_))
        ));
        assert!(matches!(
            Autocovariance::from_csd(&csd, 0, 8),
            Err(MIError::InvalidParameter(_))
        ));
        assert!(Autocovariance::from_csd(&csd, 0, 7).is_ok());
    }

    #[test]
    fn test_singular_fit() {
        let lags = vec![DMatrix::zeros(2, 2), DMatrix::zeros(2, 2)];
        let autocov = Autocovariance::new(lags).unwrap();
        assert!(matches!(
            VarModel::fit(&autocov),
            Err(MIError::NumericalError(_))
        ));
    }
}
