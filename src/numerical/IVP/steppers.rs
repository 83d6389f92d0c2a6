//! Explicit embedded Runge-Kutta steppers.
//!
//! A stepper advances the state by one trial step and reports an embedded local
//! error estimate; it never decides whether the step is kept. Steppers hold no
//! mutable state, so the same instance can serve many trajectories at once.
//!
//! Dormand-Prince coefficients: E. Hairer, S. P. Norsett, G. Wanner,
//! "Solving Ordinary Differential Equations I", II.5 and the DOPRI5 code.
use crate::numerical::IVP::dense_output::Interpolant;
use enum_dispatch::enum_dispatch;
use nalgebra::DVector;
use std::sync::Arc;
use strum_macros::{Display, EnumIter, EnumString};

/// Result of one trial step.
#[derive(Debug, Clone)]
pub struct StepOutcome {
    pub y_new: DVector<f64>,
    /// f(t + h, y_new), reused as the first stage of the next step
    pub f_new: DVector<f64>,
    /// unnormalized local error estimate
    pub error: DVector<f64>,
    /// native continuous extension, if the method has one
    pub interpolant: Option<Interpolant>,
    pub nfev: usize,
}

#[enum_dispatch]
pub trait Stepper {
    fn name(&self) -> String;
    /// order of the embedded error estimate (lower member of the pair)
    fn order(&self) -> usize;
    fn supports_dense_output(&self) -> bool;
    /// one trial step of size `h` (signed) from `(t, y)`, `f0 = f(t, y)`
    fn step(&self, rhs: &dyn Fn(f64, &DVector<f64>) -> DVector<f64>, t: f64, y: &DVector<f64>, f0: &DVector<f64>, h: f64) -> StepOutcome;
}

/// y + h * sum(a_i * k_i)
fn stage(y: &DVector<f64>, h: f64, terms: &[(f64, &DVector<f64>)]) -> DVector<f64> {
    let mut out = y.clone();
    for (a, k) in terms {
        if *a != 0.0 {
            out.axpy(h * *a, *k, 1.0);
        }
    }
    out
}

/// h * sum(a_i * k_i)
fn weighted_sum(len: usize, h: f64, terms: &[(f64, &DVector<f64>)]) -> DVector<f64> {
    stage(&DVector::zeros(len), h, terms)
}

const C2: f64 = 0.2;
const C3: f64 = 0.3;
const C4: f64 = 0.8;
const C5: f64 = 8.0 / 9.0;
const A21: f64 = 0.2;
const A31: f64 = 3.0 / 40.0;
const A32: f64 = 9.0 / 40.0;
const A41: f64 = 44.0 / 45.0;
const A42: f64 = -56.0 / 15.0;
const A43: f64 = 32.0 / 9.0;
const A51: f64 = 19372.0 / 6561.0;
const A52: f64 = -25360.0 / 2187.0;
const A53: f64 = 64448.0 / 6561.0;
const A54: f64 = -212.0 / 729.0;
const A61: f64 = 9017.0 / 3168.0;
const A62: f64 = -355.0 / 33.0;
const A63: f64 = 46732.0 / 5247.0;
const A64: f64 = 49.0 / 176.0;
const A65: f64 = -5103.0 / 18656.0;
const A71: f64 = 35.0 / 384.0;
const A73: f64 = 500.0 / 1113.0;
const A74: f64 = 125.0 / 192.0;
const A75: f64 = -2187.0 / 6784.0;
const A76: f64 = 11.0 / 84.0;
const E1: f64 = 71.0 / 57600.0;
const E3: f64 = -71.0 / 16695.0;
const E4: f64 = 71.0 / 1920.0;
const E5: f64 = -17253.0 / 339200.0;
const E6: f64 = 22.0 / 525.0;
const E7: f64 = -1.0 / 40.0;
const D1: f64 = -12715105075.0 / 11282082432.0;
const D3: f64 = 87487479700.0 / 32700410799.0;
const D4: f64 = -10690763975.0 / 1880347072.0;
const D5: f64 = 701980252875.0 / 199316789632.0;
const D6: f64 = -1453857185.0 / 822651844.0;
const D7: f64 = 69997945.0 / 29380423.0;

/// Dormand-Prince 5(4), FSAL, with quartic dense output.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct DormandPrince;

impl Stepper for DormandPrince {
    fn name(&self) -> String {
        "DOPRI5".to_string()
    }
    fn order(&self) -> usize {
        4
    }
    fn supports_dense_output(&self) -> bool {
        true
    }
    fn step(&self, rhs: &dyn Fn(f64, &DVector<f64>) -> DVector<f64>, t: f64, y: &DVector<f64>, f0: &DVector<f64>, h: f64) -> StepOutcome {
        let k1 = f0;
        let k2 = rhs(t + C2 * h, &stage(y, h, &[(A21, k1)]));
        let k3 = rhs(t + C3 * h, &stage(y, h, &[(A31, k1), (A32, &k2)]));
        let k4 = rhs(t + C4 * h, &stage(y, h, &[(A41, k1), (A42, &k2), (A43, &k3)]));
        let k5 = rhs(
            t + C5 * h,
            &stage(y, h, &[(A51, k1), (A52, &k2), (A53, &k3), (A54, &k4)]),
        );
        let k6 = rhs(
            t + h,
            &stage(y, h, &[(A61, k1), (A62, &k2), (A63, &k3), (A64, &k4), (A65, &k5)]),
        );
        let y_new = stage(y, h, &[(A71, k1), (A73, &k3), (A74, &k4), (A75, &k5), (A76, &k6)]);
        let k7 = rhs(t + h, &y_new);
        let n = y.len();
        let error = weighted_sum(
            n,
            h,
            &[(E1, k1), (E3, &k3), (E4, &k4), (E5, &k5), (E6, &k6), (E7, &k7)],
        );
        // continuous extension coefficients
        let ydiff = &y_new - y;
        let bspl = k1 * h - &ydiff;
        let r4 = &ydiff - &k7 * h - &bspl;
        let r5 = weighted_sum(
            n,
            h,
            &[(D1, k1), (D3, &k3), (D4, &k4), (D5, &k5), (D6, &k6), (D7, &k7)],
        );
        let rcont = [y.clone(), ydiff, bspl, r4, r5];
        StepOutcome {
            y_new,
            f_new: k7,
            error,
            interpolant: Some(Interpolant::DormandPrince { rcont }),
            nfev: 6,
        }
    }
}

/// Bogacki-Shampine 3(2), FSAL, cubic Hermite dense output.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct BogackiShampine;

impl Stepper for BogackiShampine {
    fn name(&self) -> String {
        "BS23".to_string()
    }
    fn order(&self) -> usize {
        2
    }
    fn supports_dense_output(&self) -> bool {
        true
    }
    fn step(&self, rhs: &dyn Fn(f64, &DVector<f64>) -> DVector<f64>, t: f64, y: &DVector<f64>, f0: &DVector<f64>, h: f64) -> StepOutcome {
        let k1 = f0;
        let k2 = rhs(t + 0.5 * h, &stage(y, h, &[(0.5, k1)]));
        let k3 = rhs(t + 0.75 * h, &stage(y, h, &[(0.75, &k2)]));
        let y_new = stage(y, h, &[(2.0 / 9.0, k1), (1.0 / 3.0, &k2), (4.0 / 9.0, &k3)]);
        let k4 = rhs(t + h, &y_new);
        let error = weighted_sum(
            y.len(),
            h,
            &[(-5.0 / 72.0, k1), (1.0 / 12.0, &k2), (1.0 / 9.0, &k3), (-1.0 / 8.0, &k4)],
        );
        StepOutcome {
            y_new,
            interpolant: Some(Interpolant::Hermite {
                f_old: k1.clone(),
                f_new: k4.clone(),
            }),
            f_new: k4,
            error,
            nfev: 3,
        }
    }
}

/// Heun-Euler 2(1). No continuous extension of its own.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct HeunEuler;

impl Stepper for HeunEuler {
    fn name(&self) -> String {
        "HeunEuler".to_string()
    }
    fn order(&self) -> usize {
        1
    }
    fn supports_dense_output(&self) -> bool {
        false
    }
    fn step(&self, rhs: &dyn Fn(f64, &DVector<f64>) -> DVector<f64>, t: f64, y: &DVector<f64>, f0: &DVector<f64>, h: f64) -> StepOutcome {
        let k1 = f0;
        let k2 = rhs(t + h, &stage(y, h, &[(1.0, k1)]));
        let y_new = stage(y, h, &[(0.5, k1), (0.5, &k2)]);
        let error = weighted_sum(y.len(), h, &[(-0.5, k1), (0.5, &k2)]);
        let f_new = rhs(t + h, &y_new);
        StepOutcome {
            y_new,
            f_new,
            error,
            interpolant: None,
            nfev: 2,
        }
    }
}

/// User-supplied stepper.
#[derive(Clone)]
pub struct CustomStepper(pub Arc<dyn Stepper + Send + Sync>);

impl std::fmt::Debug for CustomStepper {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "CustomStepper({})", self.0.name())
    }
}

impl Stepper for CustomStepper {
    fn name(&self) -> String {
        self.0.name()
    }
    fn order(&self) -> usize {
        self.0.order()
    }
    fn supports_dense_output(&self) -> bool {
        self.0.supports_dense_output()
    }
    fn step(&self, rhs: &dyn Fn(f64, &DVector<f64>) -> DVector<f64>, t: f64, y: &DVector<f64>, f0: &DVector<f64>, h: f64) -> StepOutcome {
        self.0.step(rhs, t, y, f0, h)
    }
}

/// Closed set of steppers chosen once at setup.
#[enum_dispatch(Stepper)]
#[derive(Debug, Clone)]
pub enum StepperKind {
    DormandPrince(DormandPrince),
    BogackiShampine(BogackiShampine),
    HeunEuler(HeunEuler),
    Custom(CustomStepper),
}

impl Default for StepperKind {
    fn default() -> Self {
        StepperKind::DormandPrince(DormandPrince)
    }
}

impl StepperKind {
    pub fn custom<S: Stepper + Send + Sync + 'static>(stepper: S) -> Self {
        StepperKind::Custom(CustomStepper(Arc::new(stepper)))
    }
}

/// Names under which the built-in steppers can be requested.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, EnumString, EnumIter)]
pub enum Method {
    #[strum(serialize = "DOPRI5", serialize = "RK45", serialize = "DP5")]
    DOPRI5,
    #[strum(serialize = "BS23", serialize = "RK23")]
    BS23,
    #[strum(serialize = "HeunEuler", serialize = "RK12")]
    HeunEuler,
}

impl Method {
    pub fn stepper(&self) -> StepperKind {
        match self {
            Method::DOPRI5 => StepperKind::DormandPrince(DormandPrince),
            Method::BS23 => StepperKind::BogackiShampine(BogackiShampine),
            Method::HeunEuler => StepperKind::HeunEuler(HeunEuler),
        }
    }
}
