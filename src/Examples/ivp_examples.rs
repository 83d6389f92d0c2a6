// Copyright (c)  by Gleb E. Zaslavkiy
//MIT License
#![allow(non_snake_case)]

use crate::numerical::IVP::{
    CallbackSet, CancellationToken, CrossingDirection, EnsembleAlgorithm, EnsembleProblem,
    EventContext, EventDefinition, IVPProblem, Integrator, Method, SavePosition, SolverConfig,
    StepperKind, solve, solve_ensemble,
};
use log::LevelFilter;
use nalgebra::DVector;
use strum::IntoEnumIterator;

pub fn ivp_examples(example: usize) {
    match example {
        0 => {
            // harmonic oscillator y'' = -w^2 y written as a first order system
            let problem = IVPProblem::new(
                |y: &DVector<f64>, w: &f64, _t: f64| DVector::from_vec(vec![y[1], -w * w * y[0]]),
                DVector::from_vec(vec![1.0, 0.0]),
                (0.0, 10.0),
                2.0,
            );
            let mut config = SolverConfig::default();
            config.set_tolerances(1e-8, 1e-10);
            config.log_level = Some(LevelFilter::Info);
            let sol = solve(&problem, &StepperKind::default(), &config, &CallbackSet::new());
            println!("status {}, {} samples", sol.retcode, sol.len());
            // dense output anywhere inside the span
            for t in [0.5, 2.75, 9.9] {
                let y = sol.evaluate(t).unwrap();
                println!("y({}) = {:.8}, exact {:.8}", t, y[0], (2.0 * t).cos());
            }
            let (t, y) = sol.get_result();
            println!("t: {} points, y: {:?}", t.len(), y.shape());
        }
        1 => {
            // every built-in method on the same problem
            let problem = IVPProblem::new(
                |u: &DVector<f64>, _p: &(), t: f64| u * (-(t.cos())),
                DVector::from_vec(vec![1.0]),
                (0.0, 4.0),
                (),
            );
            let mut config = SolverConfig::default();
            config.set_tolerances(1e-6, 1e-9);
            for method in Method::iter() {
                let sol = solve(&problem, &method.stepper(), &config, &CallbackSet::new());
                let exact = (-(4f64.sin())).exp();
                println!(
                    "{}: error {:e}, {} accepted, {} rejected",
                    method,
                    (sol.u.last().unwrap()[0] - exact).abs(),
                    sol.stats.naccept,
                    sol.stats.nreject
                );
            }
        }
        2 => {
            // bouncing ball: y' = v, v' = -g; the impact reverses and damps the velocity
            let problem = IVPProblem::new(
                |y: &DVector<f64>, g: &f64, _t: f64| DVector::from_vec(vec![y[1], -*g]),
                DVector::from_vec(vec![10.0, 0.0]),
                (0.0, 15.0),
                9.81,
            );
            let bounce = EventDefinition::continuous(
                "ground",
                |_t: f64, y: &DVector<f64>| y[0],
                |ctx: &mut EventContext| {
                    let state = ctx.state_mut();
                    state[0] = 0.0;
                    state[1] = -0.8 * state[1];
                },
            )
            .with_direction(CrossingDirection::Falling);
            let callbacks = CallbackSet::new().with(bounce);
            let sol = solve(&problem, &StepperKind::default(), &SolverConfig::default(), &callbacks);
            for record in &sol.event_log {
                println!("{} at t = {:.6}", record.name, record.t);
            }
            sol.print_statistics();
        }
        3 => {
            // stop the integration when u reaches 2: u' = u, u(0) = 1 gives t = ln 2
            let problem = IVPProblem::new(
                |u: &DVector<f64>, _p: &(), _t: f64| u.clone(),
                DVector::from_vec(vec![1.0]),
                (0.0, 5.0),
                (),
            );
            let callbacks = CallbackSet::new().with(EventDefinition::terminating(
                "u = 2",
                |_t: f64, u: &DVector<f64>| u[0] - 2.0,
            ));
            let mut config = SolverConfig::default();
            config.set_tolerances(1e-10, 1e-12);
            let sol = solve(&problem, &StepperKind::default(), &config, &callbacks);
            let (t, u) = sol.last().unwrap();
            println!(
                "{}: t = {:.10} (ln 2 = {:.10}), u = {:.10}",
                sol.retcode,
                t,
                2f64.ln(),
                u[0]
            );
            println!("{:?}", sol.message);
        }
        4 => {
            // dosing: a discrete event at fixed stop times adds a dose to the compartment
            let problem = IVPProblem::new(
                |c: &DVector<f64>, k: &f64, _t: f64| c * (-*k),
                DVector::from_vec(vec![0.0]),
                (0.0, 24.0),
                0.3,
            );
            let dose_times = vec![0.5, 6.0, 12.0, 18.0];
            let times = dose_times.clone();
            let dose = EventDefinition::discrete(
                "dose",
                move |t: f64, _c: &DVector<f64>| times.iter().any(|td| *td == t),
                |ctx: &mut EventContext| ctx.state_mut()[0] += 10.0,
            )
            .with_save_position(SavePosition::Both);
            let config = SolverConfig {
                tstops: dose_times,
                ..SolverConfig::default()
            };
            let sol = solve(&problem, &StepperKind::default(), &config, &CallbackSet::new().with(dose));
            for (t, c) in sol.t.iter().zip(sol.u.iter()) {
                println!("t = {:>8.4}  c = {:.6}", t, c[0]);
            }
        }
        5 => {
            // step by step driving with early cancellation
            let problem = IVPProblem::new(
                |y: &DVector<f64>, _p: &(), _t: f64| DVector::from_vec(vec![y[1], -y[0]]),
                DVector::from_vec(vec![0.0, 1.0]),
                (0.0, 100.0),
                (),
            );
            let token = CancellationToken::new();
            let config = SolverConfig {
                cancel: Some(token.clone()),
                max_step: 0.1,
                ..SolverConfig::default()
            };
            let stepper = StepperKind::default();
            let callbacks = CallbackSet::new();
            let mut integrator = Integrator::new(&problem, &stepper, &config, &callbacks);
            while !integrator.state().is_terminal() {
                integrator.step();
                if integrator.t() > 1.0 {
                    token.cancel();
                }
            }
            let sol = integrator.into_solution();
            println!("{} at t = {}: {:?}", sol.retcode, sol.t.last().unwrap(), sol.message);
        }
        6 => {
            // ensemble of decays with different rates, run on the thread pool
            let problem = IVPProblem::new(
                |u: &DVector<f64>, k: &f64, _t: f64| u * (-*k),
                DVector::from_vec(vec![1.0]),
                (0.0, 2.0),
                1.0,
            );
            let ensemble = EnsembleProblem::new(problem, |base: &IVPProblem<f64>, i: usize| {
                base.remake(None, None, Some(0.1 * (i as f64 + 1.0)))
            });
            let sol = solve_ensemble(
                &ensemble,
                &StepperKind::default(),
                &SolverConfig::default(),
                &CallbackSet::new(),
                16,
                EnsembleAlgorithm::Threads,
            );
            for (i, u) in sol.final_states().iter().enumerate() {
                println!("trajectory {}: {:?}", i, u.as_ref().map(|u| u[0]));
            }
        }
        7 => {
            // solver settings from a TOML document
            let content = r#"
                reltol = 1e-8
                abstol = [1e-10, 1e-10]
                max_step = 0.5
                tstops = [1.0, 2.0]
                [controller]
                safety = 0.8
                beta = 0.04
            "#;
            match SolverConfig::from_toml_str(content) {
                Ok(config) => {
                    let problem = IVPProblem::new(
                        |y: &DVector<f64>, _p: &(), _t: f64| DVector::from_vec(vec![y[1], -y[0]]),
                        DVector::from_vec(vec![1.0, 0.0]),
                        (0.0, 3.0),
                        (),
                    );
                    let sol = solve(&problem, &Method::DOPRI5.stepper(), &config, &CallbackSet::new());
                    println!("{}", sol.statistics_table());
                }
                Err(e) => println!("bad config: {}", e),
            }
        }
        _ => println!("no such example"),
    }
}
