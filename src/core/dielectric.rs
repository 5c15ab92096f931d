//! Dielectric mixing models
//!
//! Both models predict the real dielectric constant (RDC) of a soil from its volumetric
//! moisture `mv` (m^3/m^3) and auxiliary soil information. They are inverted per pixel by
//! [`crate::core::solver::ScalarInversionSolver`].

use crate::io::properties::PropertyMap;
use crate::types::RetrievalResult;
use num_complex::Complex64;
use serde::{Deserialize, Serialize};
use std::f64::consts::PI;
use std::path::Path;

/// Permittivity of free space (F/m)
const VACUUM_PERMITTIVITY: f64 = 8.854_187_817e-12;

/// Reference temperature of the Mironov relaxation parameters (°C)
const REFERENCE_TEMPERATURE: f64 = 20.0;

/// Polynomial model, `eps' = A + B mv + C mv^2` with texture-dependent terms
///
/// `fixed = [sand %, clay %]`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HallikainenCoefficients {
    pub a: [f64; 3],
    pub b: [f64; 3],
    pub c: [f64; 3],
}

impl Default for HallikainenCoefficients {
    /// Real part, 6 GHz
    fn default() -> Self {
        Self {
            a: [1.993, 0.002, 0.015],
            b: [38.086, -0.176, -0.633],
            c: [10.720, 1.256, 1.522],
        }
    }
}

impl HallikainenCoefficients {
    /// Real part, 1.4 GHz
    pub fn l_band() -> Self {
        Self {
            a: [2.862, -0.012, 0.001],
            b: [3.803, 0.462, -0.341],
            c: [119.006, -0.500, 0.633],
        }
    }

    pub fn from_properties(props: &PropertyMap) -> RetrievalResult<Self> {
        let mut coefficients = Self::default();
        for (name, terms) in [
            ("a", &mut coefficients.a),
            ("b", &mut coefficients.b),
            ("c", &mut coefficients.c),
        ] {
            for (i, term) in terms.iter_mut().enumerate() {
                *term = props.get_f64(&format!("Hallikainen.{}{}", name, i))?;
            }
        }
        Ok(coefficients)
    }

    /// Moisture-independent, linear and quadratic terms for a soil texture
    fn terms(&self, sand: f64, clay: f64) -> (f64, f64, f64) {
        let mix = |k: &[f64; 3]| k[0] + k[1] * sand + k[2] * clay;
        (mix(&self.a), mix(&self.b), mix(&self.c))
    }
}

/// Generalized refractive mixing model (bound and unbound soil water)
///
/// `fixed = [clay %, temperature °C]`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MironovCoefficients {
    pub frequency_ghz: f64,
    /// Dry soil refractive index, quadratic in clay fraction
    pub nd: [f64; 3],
    /// Dry soil normalized attenuation, linear in clay fraction
    pub kd: [f64; 2],
    /// Maximum bound water fraction, linear in clay fraction
    pub mvt: [f64; 2],
    /// Bound water static permittivity at 20 °C, quadratic in clay fraction
    pub eps0b: [f64; 3],
    /// Bound water relaxation time at 20 °C (s), linear in clay fraction
    pub taub: [f64; 2],
    /// Bound water conductivity (S/m), linear in clay fraction
    pub sigmab: [f64; 2],
    /// Unbound water static permittivity at 20 °C
    pub eps0u: f64,
    /// Unbound water relaxation time at 20 °C (s)
    pub tauu: f64,
    /// Unbound water conductivity (S/m), linear in clay fraction
    pub sigmau: [f64; 2],
    /// High-frequency permittivity of soil water
    pub eps_inf: f64,
    /// Replace the law below `mv1` by an even parabola
    pub symmetrized: bool,
    pub mv1: f64,
}

impl Default for MironovCoefficients {
    fn default() -> Self {
        Self {
            frequency_ghz: 5.405,
            nd: [1.634, -0.539, 0.2748],
            kd: [0.03952, -0.04038],
            mvt: [0.02863, 0.30673],
            eps0b: [79.8, -85.4, 32.7],
            taub: [1.062e-11, 3.450e-12],
            sigmab: [0.3112, 0.467],
            eps0u: 100.0,
            tauu: 8.5e-12,
            sigmau: [0.3631, 1.217],
            eps_inf: 4.9,
            symmetrized: true,
            mv1: 0.01,
        }
    }
}

/// Composition- and temperature-dependent terms of the mixing law
#[derive(Debug, Clone, Copy)]
struct MixingTerms {
    nd: f64,
    kd: f64,
    mvt: f64,
    nb: f64,
    kb: f64,
    nu: f64,
    ku: f64,
}

impl MironovCoefficients {
    pub fn from_properties(props: &PropertyMap) -> RetrievalResult<Self> {
        let f = |key: &str| props.get_f64(&format!("Mironov.{}", key));
        let defaults = Self::default();
        Ok(Self {
            frequency_ghz: f("frequency")?,
            nd: [f("nd0")?, f("nd1")?, f("nd2")?],
            kd: [f("kd0")?, f("kd1")?],
            mvt: [f("mvt0")?, f("mvt1")?],
            eps0b: [f("eps0b0")?, f("eps0b1")?, f("eps0b2")?],
            taub: [f("taub0")?, f("taub1")?],
            sigmab: [f("sigmab0")?, f("sigmab1")?],
            eps0u: f("eps0u")?,
            tauu: f("tauu")?,
            sigmau: [f("sigmau0")?, f("sigmau1")?],
            eps_inf: f("einf")?,
            symmetrized: props.get_bool_or("Mironov.symmetrized", defaults.symmetrized)?,
            mv1: match props.get("Mironov.mv1") {
                Some(_) => f("mv1")?,
                None => defaults.mv1,
            },
        })
    }

    fn terms(&self, clay_percent: f64, temperature: f64) -> MixingTerms {
        let c = clay_percent / 100.0;
        let omega = 2.0 * PI * self.frequency_ghz * 1.0e9;
        let eps_ratio = water_static_permittivity(temperature)
            / water_static_permittivity(REFERENCE_TEMPERATURE);
        let tau_ratio =
            water_relaxation_time(temperature) / water_relaxation_time(REFERENCE_TEMPERATURE);

        let eps0b = (self.eps0b[0] + self.eps0b[1] * c + self.eps0b[2] * c * c) * eps_ratio;
        let taub = (self.taub[0] + self.taub[1] * c) * tau_ratio;
        let sigmab = self.sigmab[0] + self.sigmab[1] * c;
        let eps0u = self.eps0u * eps_ratio;
        let tauu = self.tauu * tau_ratio;
        let sigmau = self.sigmau[0] + self.sigmau[1] * c;

        let bound = debye(self.eps_inf, eps0b, taub, sigmab, omega).sqrt();
        let unbound = debye(self.eps_inf, eps0u, tauu, sigmau, omega).sqrt();

        MixingTerms {
            nd: self.nd[0] + self.nd[1] * c + self.nd[2] * c * c,
            kd: self.kd[0] + self.kd[1] * c,
            mvt: self.mvt[0] + self.mvt[1] * c,
            nb: bound.re,
            kb: bound.im,
            nu: unbound.re,
            ku: unbound.im,
        }
    }

    /// Refractive mixing law: (value, derivative) at moisture `mv`
    fn mixing_law(&self, t: &MixingTerms, mv: f64) -> (f64, f64) {
        let bound_fraction = mv.min(t.mvt);
        let free_fraction = (mv - t.mvt).max(0.0);

        let n = t.nd + (t.nb - 1.0) * bound_fraction + (t.nu - 1.0) * free_fraction;
        let k = t.kd + t.kb * bound_fraction + t.ku * free_fraction;

        let (dn, dk) = if mv < t.mvt {
            (t.nb - 1.0, t.kb)
        } else {
            (t.nu - 1.0, t.ku)
        };

        (n * n - k * k, 2.0 * n * dn - 2.0 * k * dk)
    }

    /// (value, derivative) including the optional even parabola below `mv1`
    fn evaluate(&self, mv: f64, clay_percent: f64, temperature: f64) -> (f64, f64) {
        let t = self.terms(clay_percent, temperature);

        if !self.symmetrized {
            return self.mixing_law(&t, mv);
        }

        let u = mv.abs();
        let sign = if mv < 0.0 { -1.0 } else { 1.0 };

        if u < self.mv1 {
            let (f1, df1) = self.mixing_law(&t, self.mv1);
            let b = df1 / (2.0 * self.mv1);
            let a = f1 - df1 * self.mv1 / 2.0;
            (a + b * mv * mv, 2.0 * b * mv)
        } else {
            let (value, derivative) = self.mixing_law(&t, u);
            (value, sign * derivative)
        }
    }
}

/// Debye relaxation with ionic conductivity
fn debye(eps_inf: f64, eps_static: f64, tau: f64, sigma: f64, omega: f64) -> Complex64 {
    let relaxation = Complex64::new(eps_static - eps_inf, 0.0) / Complex64::new(1.0, -omega * tau);
    let conduction = Complex64::new(0.0, sigma / (omega * VACUUM_PERMITTIVITY));
    Complex64::new(eps_inf, 0.0) + relaxation + conduction
}

/// Static permittivity of pure water (Klein-Swift)
pub fn water_static_permittivity(temperature: f64) -> f64 {
    let t = temperature;
    87.134 - 1.949e-1 * t - 1.276e-2 * t * t + 2.491e-4 * t * t * t
}

/// Relaxation time of pure water in seconds (Stogryn)
pub fn water_relaxation_time(temperature: f64) -> f64 {
    let t = temperature;
    (1.1109e-10 - 3.824e-12 * t + 6.938e-14 * t * t - 5.096e-16 * t * t * t) / (2.0 * PI)
}

/// Model family named in configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ForwardModelKind {
    Hallikainen,
    Mironov,
}

impl std::str::FromStr for ForwardModelKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "hallikainen" => Ok(ForwardModelKind::Hallikainen),
            "mironov" => Ok(ForwardModelKind::Mironov),
            _ => Err(format!("Unknown dielectric model: {}", s)),
        }
    }
}

/// Closed-form dielectric model, RDC as a function of soil moisture
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ForwardModel {
    Hallikainen(HallikainenCoefficients),
    Mironov(MironovCoefficients),
}

impl ForwardModel {
    pub fn kind(&self) -> ForwardModelKind {
        match self {
            ForwardModel::Hallikainen(_) => ForwardModelKind::Hallikainen,
            ForwardModel::Mironov(_) => ForwardModelKind::Mironov,
        }
    }

    /// Load coefficients of `kind` from a key-value file
    pub fn load<P: AsRef<Path>>(kind: ForwardModelKind, path: P) -> RetrievalResult<Self> {
        let props = PropertyMap::load(path)?;
        let model = Self::from_properties(kind, &props)?;
        log::info!("Loaded {:?} coefficients from {}", kind, props.source());
        Ok(model)
    }

    pub fn from_properties(kind: ForwardModelKind, props: &PropertyMap) -> RetrievalResult<Self> {
        Ok(match kind {
            ForwardModelKind::Hallikainen => {
                ForwardModel::Hallikainen(HallikainenCoefficients::from_properties(props)?)
            }
            ForwardModelKind::Mironov => {
                ForwardModel::Mironov(MironovCoefficients::from_properties(props)?)
            }
        })
    }

    /// Number of auxiliary inputs in `fixed`
    pub fn num_fixed(&self) -> usize {
        2
    }

    /// Names of the auxiliary inputs, in `fixed` order
    pub fn fixed_names(&self) -> [&'static str; 2] {
        match self {
            ForwardModel::Hallikainen(_) => ["sand", "clay"],
            ForwardModel::Mironov(_) => ["clay", "temperature"],
        }
    }

    /// Predicted RDC for moisture `mv`
    pub fn predict(&self, mv: f64, fixed: &[f64]) -> f64 {
        self.evaluate(mv, fixed).0
    }

    /// d(RDC)/d(mv)
    pub fn derivative(&self, mv: f64, fixed: &[f64]) -> f64 {
        self.evaluate(mv, fixed).1
    }

    fn evaluate(&self, mv: f64, fixed: &[f64]) -> (f64, f64) {
        match self {
            ForwardModel::Hallikainen(k) => {
                let (a, b, c) = k.terms(fixed[0], fixed[1]);
                (a + b * mv + c * mv * mv, b + 2.0 * c * mv)
            }
            ForwardModel::Mironov(k) => k.evaluate(mv, fixed[0], fixed[1]),
        }
    }

    /// Whether the auxiliary inputs lie in the model's domain
    pub fn check_fixed(&self, fixed: &[f64]) -> bool {
        if fixed.len() != self.num_fixed() || fixed.iter().any(|v| !v.is_finite()) {
            return false;
        }
        let percent = |v: f64| (0.0..=100.0).contains(&v);
        match self {
            ForwardModel::Hallikainen(_) => {
                percent(fixed[0]) && percent(fixed[1]) && fixed[0] + fixed[1] <= 100.0
            }
            ForwardModel::Mironov(_) => percent(fixed[0]) && (-20.0..=60.0).contains(&fixed[1]),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_hallikainen_polynomial() {
        let model = ForwardModel::Hallikainen(HallikainenCoefficients::default());
        let fixed = [30.0, 20.0];
        let a = 1.993 + 0.002 * 30.0 + 0.015 * 20.0;
        let b = 38.086 - 0.176 * 30.0 - 0.633 * 20.0;
        let c = 10.720 + 1.256 * 30.0 + 1.522 * 20.0;
        assert_relative_eq!(model.predict(0.0, &fixed), a, epsilon = 1e-12);
        assert_relative_eq!(model.predict(0.25, &fixed), a + b * 0.25 + c * 0.0625, epsilon = 1e-12);
        assert_relative_eq!(model.derivative(0.25, &fixed), b + 2.0 * c * 0.25, epsilon = 1e-12);
    }

    #[test]
    fn test_mironov_is_increasing_in_moisture() {
        let model = ForwardModel::Mironov(MironovCoefficients::default());
        let fixed = [20.0, 20.0];
        let mut last = model.predict(0.0, &fixed);
        for i in 1..=50 {
            let mv = i as f64 * 0.01;
            let value = model.predict(mv, &fixed);
            assert!(value > last, "not increasing at mv = {}", mv);
            last = value;
        }
        let wet = model.predict(0.4, &fixed);
        assert!(wet > 15.0 && wet < 35.0, "unexpected RDC {}", wet);
    }

    #[test]
    fn test_symmetrized_branch_is_continuous() {
        let coeffs = MironovCoefficients::default();
        let model = ForwardModel::Mironov(coeffs.clone());
        let fixed = [25.0, 15.0];
        let u1 = coeffs.mv1;

        let law = ForwardModel::Mironov(MironovCoefficients {
            symmetrized: false,
            ..coeffs
        });
        let f1 = law.predict(u1, &fixed);
        let df1 = law.derivative(u1, &fixed);

        for eps in [1e-4, 1e-6, 1e-8] {
            assert!((model.predict(u1 - eps, &fixed) - f1).abs() < 10.0 * eps * df1.abs() + 1e-12);
            assert!((model.derivative(u1 - eps, &fixed) - df1).abs() < 10.0 * eps * df1.abs() / u1 + 1e-9);
        }
        assert_relative_eq!(model.predict(u1, &fixed), f1, epsilon = 1e-12);
        assert_relative_eq!(model.predict(-0.2, &fixed), model.predict(0.2, &fixed), epsilon = 1e-12);
        assert_relative_eq!(model.derivative(0.0, &fixed), 0.0, epsilon = 1e-12);
    }

    #[test]
    fn test_auxiliary_domain() {
        let h = ForwardModel::Hallikainen(HallikainenCoefficients::default());
        assert!(h.check_fixed(&[40.0, 30.0]));
        assert!(!h.check_fixed(&[70.0, 40.0]));
        assert!(!h.check_fixed(&[f64::NAN, 10.0]));
        let m = ForwardModel::Mironov(MironovCoefficients::default());
        assert!(m.check_fixed(&[30.0, 25.0]));
        assert!(!m.check_fixed(&[30.0, 80.0]));
        assert!(!m.check_fixed(&[30.0]));
    }

    #[test]
    fn test_water_reference_values() {
        assert_relative_eq!(water_static_permittivity(20.0), 80.2, epsilon = 0.1);
        assert!(water_relaxation_time(20.0) > 9.0e-12 && water_relaxation_time(20.0) < 9.7e-12);
    }

    #[test]
    fn test_coefficients_from_properties() {
        let text = "Hallikainen.a0 = 2.862\nHallikainen.a1 = -0.012\nHallikainen.a2 = 0.001\n\
                    Hallikainen.b0 = 3.803\nHallikainen.b1 = 0.462\nHallikainen.b2 = -0.341\n\
                    Hallikainen.c0 = 119.006\nHallikainen.c1 = -0.500\nHallikainen.c2 = 0.633\n";
        let props = PropertyMap::parse(text, "l_band.properties").unwrap();
        let model = ForwardModel::from_properties(ForwardModelKind::Hallikainen, &props).unwrap();
        assert_eq!(model, ForwardModel::Hallikainen(HallikainenCoefficients::l_band()));

        let partial = PropertyMap::parse("Hallikainen.a0 = 1\n", "partial").unwrap();
        assert!(ForwardModel::from_properties(ForwardModelKind::Hallikainen, &partial).is_err());
    }
}
