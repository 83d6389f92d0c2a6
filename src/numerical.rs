/// SOLVER OF NON-STIFF IVP WITH EVENTS
/// Example
/// ```
/// use RustedIVP::numerical::IVP::{IVPProblem, Method, SolverConfig, CallbackSet, solve};
/// use nalgebra::DVector;
/// // harmonic oscillator y1' = y2, y2' = -y1
/// let problem = IVPProblem::new(
///     |y: &DVector<f64>, _p: &(), _t: f64| DVector::from_vec(vec![y[1], -y[0]]),
///     DVector::from_vec(vec![1.0, 0.0]),
///     (0.0, 10.0),
///     (),
/// );
/// let mut config = SolverConfig::default();
/// config.set_tolerances(1e-8, 1e-10);
/// let sol = solve(&problem, &Method::DOPRI5.stepper(), &config, &CallbackSet::new());
/// // dense output anywhere in the span
/// let y = sol.evaluate(2.5).unwrap();
/// assert!((y[0] - 2.5f64.cos()).abs() < 1e-6);
/// ```
pub mod IVP;
