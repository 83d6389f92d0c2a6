#[cfg(test)]
mod tests_IVP {
    use crate::numerical::IVP::IVP_errors::IVPError;
    use crate::numerical::IVP::config::{CancellationToken, SolverConfig};
    use crate::numerical::IVP::events::{
        CallbackSet, CrossingDirection, EventContext, EventDefinition, SavePosition,
    };
    use crate::numerical::IVP::integrator::{Integrator, IntegratorState, solve};
    use crate::numerical::IVP::problem::IVPProblem;
    use crate::numerical::IVP::solution::ReturnCode;
    use crate::numerical::IVP::steppers::{DormandPrince, Method, StepOutcome, Stepper, StepperKind};
    use approx::assert_relative_eq;
    use nalgebra::DVector;
    use strum::IntoEnumIterator;

    fn exponential_growth(tf: f64) -> IVPProblem<()> {
        IVPProblem::new(
            |u: &DVector<f64>, _p: &(), _t: f64| u.clone(),
            DVector::from_vec(vec![1.0]),
            (0.0, tf),
            (),
        )
    }

    fn harmonic_oscillator(tf: f64) -> IVPProblem<f64> {
        // y1' = y2, y2' = -w^2 y1; exact y1 = cos(w t)
        IVPProblem::new(
            |y: &DVector<f64>, w: &f64, _t: f64| DVector::from_vec(vec![y[1], -w * w * y[0]]),
            DVector::from_vec(vec![1.0, 0.0]),
            (0.0, tf),
            1.0,
        )
    }

    fn tight() -> SolverConfig {
        let mut config = SolverConfig::default();
        config.set_tolerances(1e-9, 1e-11);
        config
    }

    #[test]
    fn test_harmonic_oscillator_all_methods() {
        let problem = harmonic_oscillator(5.0);
        let mut config = SolverConfig::default();
        config.set_tolerances(1e-7, 1e-9);
        for method in Method::iter() {
            let sol = solve(&problem, &method.stepper(), &config, &CallbackSet::new());
            assert_eq!(sol.retcode, ReturnCode::Success, "{}", method);
            assert_eq!(*sol.t.last().unwrap(), 5.0);
            assert_relative_eq!(sol.u.last().unwrap()[0], 5f64.cos(), epsilon = 1e-4);
            assert_relative_eq!(sol.evaluate(1.3).unwrap()[0], 1.3f64.cos(), epsilon = 1e-4);
            assert_relative_eq!(sol.derivative(1.3).unwrap()[0], -(1.3f64.sin()), epsilon = 1e-3);
        }
    }

    #[test]
    fn test_accepted_steps_meet_tolerance() {
        let problem = harmonic_oscillator(10.0);
        let config = SolverConfig::default();
        let stepper = StepperKind::default();
        let callbacks = CallbackSet::new();
        let mut integrator = Integrator::new(&problem, &stepper, &config, &callbacks);
        let mut accepted = 0;
        while !integrator.state().is_terminal() {
            if integrator.step() == IntegratorState::Accepted {
                assert!(integrator.last_error_norm() <= 1.0);
                accepted += 1;
            }
        }
        let sol = integrator.into_solution();
        assert_eq!(sol.retcode, ReturnCode::Success);
        // the last accepted step ends in Completed rather than Accepted
        assert_eq!(accepted + 1, sol.stats.naccept);
        // without events every accepted step is one stored segment
        assert_eq!(sol.segments().len(), sol.stats.naccept);
        assert_eq!(sol.stats.nsteps, sol.stats.naccept + sol.stats.nreject);
    }

    #[test]
    fn test_dense_output_exact_at_samples_and_contiguous() {
        let problem = harmonic_oscillator(7.0);
        let sol = solve(&problem, &StepperKind::default(), &tight(), &CallbackSet::new());
        assert_eq!(sol.retcode, ReturnCode::Success);
        for (t, u) in sol.t.iter().zip(sol.u.iter()) {
            assert_eq!(sol.evaluate(*t).unwrap(), *u);
        }
        let segments = sol.segments().segments();
        for pair in segments.windows(2) {
            assert_eq!(pair[0].t_end, pair[1].t_start);
            assert!(pair[0].t_start < pair[0].t_end);
        }
        // consecutive samples bound exactly one segment
        assert_eq!(segments.len() + 1, sol.t.len());
        for (i, seg) in segments.iter().enumerate() {
            assert_eq!(seg.t_start, sol.t[i]);
            assert_eq!(seg.t_end, sol.t[i + 1]);
        }
    }

    #[test]
    fn test_evaluation_is_idempotent() {
        let problem = harmonic_oscillator(3.0);
        let sol = solve(&problem, &StepperKind::default(), &SolverConfig::default(), &CallbackSet::new());
        for &t in &[0.0, 0.123, 1.5, 2.999, 3.0] {
            assert_eq!(sol.evaluate(t).unwrap(), sol.evaluate(t).unwrap());
        }
    }

    #[test]
    fn test_evaluate_at_final_time_is_last_sample() {
        let problem = exponential_growth(1.0);
        let sol = solve(&problem, &StepperKind::default(), &SolverConfig::default(), &CallbackSet::new());
        assert_eq!(sol.evaluate(1.0).unwrap(), *sol.u.last().unwrap());
        assert!(matches!(
            sol.evaluate(1.5),
            Err(IVPError::OutOfRange { .. })
        ));
    }

    #[test]
    fn test_time_event_fires_once_whatever_the_steps() {
        for &(h0, max_step) in &[(0.1, 0.1), (0.03, 0.07), (0.25, 1.0), (0.5, 0.5)] {
            let problem = harmonic_oscillator(1.0);
            let config = SolverConfig {
                initial_step: Some(h0),
                max_step,
                ..SolverConfig::default()
            };
            let callbacks = CallbackSet::new().with(EventDefinition::continuous(
                "t = 0.5",
                |t: f64, _y: &DVector<f64>| t - 0.5,
                |_ctx: &mut EventContext| {},
            ));
            let sol = solve(&problem, &StepperKind::default(), &config, &callbacks);
            assert_eq!(sol.retcode, ReturnCode::Success);
            assert_eq!(sol.event_log.len(), 1, "h0 = {}", h0);
            assert!((sol.event_log[0].t - 0.5).abs() <= 1e-12);
            assert_eq!(sol.stats.nevents, 1);
        }
    }

    #[test]
    fn test_terminating_event_exponential() {
        let problem = exponential_growth(5.0);
        let callbacks = CallbackSet::new().with(EventDefinition::terminating(
            "u = 2",
            |_t: f64, u: &DVector<f64>| u[0] - 2.0,
        ));
        let sol = solve(&problem, &StepperKind::default(), &tight(), &callbacks);
        assert_eq!(sol.retcode, ReturnCode::Terminated);
        let t_last = *sol.t.last().unwrap();
        assert_relative_eq!(t_last, 2f64.ln(), epsilon = 1e-7);
        assert_relative_eq!(sol.u.last().unwrap()[0], 2.0, epsilon = 1e-7);
        assert_eq!(sol.event_log.len(), 1);
        assert_eq!(sol.event_log[0].name, "u = 2");
        // nothing was stored beyond the event
        assert_eq!(sol.segments().t_span().unwrap().1, t_last);
        assert!(sol.message.unwrap().contains("u = 2"));
    }

    #[test]
    fn test_stiff_problem_hits_rejection_limit() {
        // y' = -1e4 (y - cos t): explicit steppers must shrink the step far below 0.1
        let problem = IVPProblem::new(
            |y: &DVector<f64>, lambda: &f64, t: f64| DVector::from_vec(vec![-lambda * (y[0] - t.cos())]),
            DVector::from_vec(vec![0.0]),
            (0.0, 1.0),
            1e4,
        );
        let config = SolverConfig {
            initial_step: Some(0.1),
            max_rejections: 3,
            ..SolverConfig::default()
        };
        for method in [Method::HeunEuler, Method::DOPRI5] {
            let sol = solve(&problem, &method.stepper(), &config, &CallbackSet::new());
            assert_eq!(sol.retcode, ReturnCode::Failed, "{}", method);
            match &sol.error {
                Some(IVPError::StepSize { t, state, .. }) => {
                    assert_eq!(*t, 0.0);
                    assert_eq!(state[0], 0.0);
                }
                other => panic!("expected step size error, got {:?}", other),
            }
            assert_eq!(sol.stats.naccept, 0);
            assert_eq!(sol.stats.nreject, 3);
            // the initial point is still there
            assert_eq!(sol.t, vec![0.0]);
            assert_eq!(sol.evaluate(0.0).unwrap()[0], 0.0);
        }
    }

    #[test]
    fn test_runs_are_bit_identical() {
        let problem = harmonic_oscillator(4.0);
        let callbacks = CallbackSet::new().with(EventDefinition::continuous(
            "y1 = 0",
            |_t: f64, y: &DVector<f64>| y[0],
            |_ctx: &mut EventContext| {},
        ));
        let config = SolverConfig::default();
        let a = solve(&problem, &StepperKind::default(), &config, &callbacks);
        let b = solve(&problem, &StepperKind::default(), &config, &callbacks);
        assert_eq!(a.t, b.t);
        assert_eq!(a.u, b.u);
        assert_eq!(a.event_log, b.event_log);
        assert_eq!(a.stats, b.stats);
    }

    #[test]
    fn test_bouncing_ball() {
        // y'' = -g, bounce with restitution 0.9 when the ball falls through y = 0
        let problem = IVPProblem::new(
            |y: &DVector<f64>, g: &f64, _t: f64| DVector::from_vec(vec![y[1], -g]),
            DVector::from_vec(vec![10.0, 0.0]),
            (0.0, 5.0),
            9.81,
        );
        let callbacks = CallbackSet::new().with(
            EventDefinition::continuous(
                "ground",
                |_t: f64, y: &DVector<f64>| y[0],
                |ctx: &mut EventContext| {
                    let v = ctx.state()[1];
                    ctx.state_mut()[1] = -0.9 * v;
                },
            )
            .with_direction(CrossingDirection::Falling),
        );
        let sol = solve(&problem, &StepperKind::default(), &tight(), &callbacks);
        assert_eq!(sol.retcode, ReturnCode::Success);
        // first impact at sqrt(2 h / g)
        let t_hit = (2.0 * 10.0 / 9.81f64).sqrt();
        assert_relative_eq!(sol.event_log[0].t, t_hit, epsilon = 1e-7);
        assert_eq!(sol.event_log.len(), 2);
        // pre and post states are both saved at the impact
        let k = sol.t.iter().position(|t| *t == sol.event_log[0].t).unwrap();
        assert_eq!(sol.t[k + 1], sol.t[k]);
        assert!(sol.u[k][1] < 0.0 && sol.u[k + 1][1] > 0.0);
        assert_relative_eq!(sol.u[k + 1][1], -0.9 * sol.u[k][1], epsilon = 1e-12);
        assert!(sol.u.iter().all(|u| u[0] > -1e-6));
    }

    #[test]
    fn test_save_position_after_only() {
        let problem = exponential_growth(1.0);
        let callbacks = CallbackSet::new().with(
            EventDefinition::continuous(
                "reset",
                |t: f64, _u: &DVector<f64>| t - 0.5,
                |ctx: &mut EventContext| ctx.set_state(DVector::from_vec(vec![1.0])),
            )
            .with_save_position(SavePosition::After),
        );
        let sol = solve(&problem, &StepperKind::default(), &tight(), &callbacks);
        let at_event: Vec<usize> = (0..sol.len()).filter(|i| sol.t[*i] == sol.event_log[0].t).collect();
        assert_eq!(at_event.len(), 1);
        assert_eq!(sol[at_event[0]][0], 1.0);
        // restarted from 1 at t = 0.5, so u(1) = e^0.5
        assert_relative_eq!(sol.u.last().unwrap()[0], 0.5f64.exp(), epsilon = 1e-7);
    }

    #[test]
    fn test_discrete_event_and_time_jump() {
        let problem = exponential_growth(2.0);
        let callbacks = CallbackSet::new().with(EventDefinition::discrete(
            "skip ahead",
            |t: f64, _u: &DVector<f64>| t >= 1.0 && t < 1.5,
            |ctx: &mut EventContext| {
                ctx.set_time(1.5).unwrap();
            },
        ));
        let config = SolverConfig {
            tstops: vec![1.0],
            ..tight()
        };
        let sol = solve(&problem, &StepperKind::default(), &config, &callbacks);
        assert_eq!(sol.retcode, ReturnCode::Success);
        assert_eq!(sol.event_log.len(), 1);
        assert_eq!(sol.event_log[0].t, 1.0);
        // the state is held over the jumped interval
        let held = sol.evaluate(1.25).unwrap()[0];
        assert_relative_eq!(held, 1f64.exp(), epsilon = 1e-7);
        assert_relative_eq!(sol.u.last().unwrap()[0], 1.5f64.exp(), epsilon = 1e-6);
        assert!(sol.t.contains(&1.5));
    }

    #[test]
    fn test_tstops_are_hit_exactly() {
        let problem = harmonic_oscillator(3.0);
        let config = SolverConfig {
            tstops: vec![2.2, 0.7, 1.123456789, 5.0],
            ..SolverConfig::default()
        };
        let sol = solve(&problem, &StepperKind::default(), &config, &CallbackSet::new());
        for ts in [0.7, 1.123456789, 2.2] {
            assert!(sol.t.contains(&ts), "missing {}", ts);
        }
        assert_eq!(*sol.t.last().unwrap(), 3.0);
    }

    #[test]
    fn test_backward_integration() {
        let problem = IVPProblem::new(
            |u: &DVector<f64>, _p: &(), _t: f64| u.clone(),
            DVector::from_vec(vec![1f64.exp()]),
            (1.0, 0.0),
            (),
        );
        let sol = solve(&problem, &StepperKind::default(), &tight(), &CallbackSet::new());
        assert_eq!(sol.retcode, ReturnCode::Success);
        assert!(sol.t.windows(2).all(|w| w[1] < w[0]));
        assert_relative_eq!(sol.u.last().unwrap()[0], 1.0, epsilon = 1e-8);
        assert_relative_eq!(sol.evaluate(0.5).unwrap()[0], 0.5f64.exp(), epsilon = 1e-8);
    }

    #[test]
    fn test_save_everystep_false_keeps_endpoints_and_dense_output() {
        let problem = harmonic_oscillator(2.0);
        let config = SolverConfig {
            save_everystep: false,
            ..tight()
        };
        let sol = solve(&problem, &StepperKind::default(), &config, &CallbackSet::new());
        assert_eq!(sol.t, vec![0.0, 2.0]);
        assert!(sol.segments().len() > 1);
        assert_relative_eq!(sol.evaluate(1.0).unwrap()[0], 1f64.cos(), epsilon = 1e-7);
    }

    #[test]
    fn test_linear_output_without_dense() {
        let problem = harmonic_oscillator(2.0);
        let config = SolverConfig {
            dense: false,
            ..SolverConfig::default()
        };
        let sol = solve(&problem, &StepperKind::default(), &config, &CallbackSet::new());
        let seg = &sol.segments().segments()[1];
        let mid = 0.5 * (seg.t_start + seg.t_end);
        let expected = (&seg.y_start + &seg.y_end) * 0.5;
        assert_relative_eq!(sol.evaluate(mid).unwrap()[0], expected[0], epsilon = 1e-12);
    }

    #[test]
    fn test_invalid_inputs_fail_cleanly() {
        let problem = exponential_growth(1.0);
        let config = SolverConfig {
            initial_step: Some(-0.1),
            ..SolverConfig::default()
        };
        let sol = solve(&problem, &StepperKind::default(), &config, &CallbackSet::new());
        assert_eq!(sol.retcode, ReturnCode::Failed);
        assert!(matches!(sol.error, Some(IVPError::InvalidInput { .. })));

        let mut config = SolverConfig::default();
        config.set_tolerances(0.0, 1e-6);
        let sol = solve(&problem, &StepperKind::default(), &config, &CallbackSet::new());
        assert!(matches!(sol.error, Some(IVPError::Tolerance { t, .. }) if t == 0.0));
        assert_eq!(sol.t, vec![0.0]);
    }

    #[test]
    fn test_non_finite_state_fails() {
        // blows up at t = 1
        let problem = IVPProblem::new(
            |u: &DVector<f64>, _p: &(), _t: f64| DVector::from_vec(vec![u[0] * u[0]]),
            DVector::from_vec(vec![1.0]),
            (0.0, 2.0),
            (),
        );
        let config = SolverConfig {
            max_iters: 2000,
            ..SolverConfig::default()
        };
        let sol = solve(&problem, &StepperKind::default(), &config, &CallbackSet::new());
        assert_eq!(sol.retcode, ReturnCode::Failed);
        assert!(sol.error.is_some());
        let t_fail = *sol.t.last().unwrap();
        assert!(t_fail > 0.9 && t_fail < 1.0 + 1e-6);
        // last sample is the last accepted state
        assert_eq!(sol.evaluate(t_fail).unwrap(), *sol.u.last().unwrap());
    }

    #[test]
    fn test_max_iters() {
        let problem = harmonic_oscillator(100.0);
        let config = SolverConfig {
            max_iters: 5,
            max_step: 0.01,
            ..SolverConfig::default()
        };
        let sol = solve(&problem, &StepperKind::default(), &config, &CallbackSet::new());
        assert!(matches!(sol.error, Some(IVPError::MaxIterations { max_iters: 5, .. })));
    }

    #[test]
    fn test_cancellation_terminates() {
        let problem = harmonic_oscillator(10.0);
        let token = CancellationToken::new();
        token.cancel();
        let config = SolverConfig {
            cancel: Some(token),
            ..SolverConfig::default()
        };
        let sol = solve(&problem, &StepperKind::default(), &config, &CallbackSet::new());
        assert_eq!(sol.retcode, ReturnCode::Terminated);
        // one accepted step, then the flag is seen
        assert_eq!(sol.stats.naccept, 1);
        assert_eq!(sol.t.len(), 2);
    }

    #[test]
    fn test_deadline_terminates() {
        let problem = harmonic_oscillator(10.0);
        let config = SolverConfig {
            deadline: Some(std::time::Instant::now()),
            ..SolverConfig::default()
        };
        let sol = solve(&problem, &StepperKind::default(), &config, &CallbackSet::new());
        assert_eq!(sol.retcode, ReturnCode::Terminated);
        assert!(sol.message.unwrap().contains("deadline"));
    }

    #[test]
    fn test_empty_time_span() {
        let problem = exponential_growth(0.0);
        let sol = solve(&problem, &StepperKind::default(), &SolverConfig::default(), &CallbackSet::new());
        assert_eq!(sol.retcode, ReturnCode::Success);
        assert_eq!(sol.t, vec![0.0]);
        assert_eq!(sol.evaluate(0.0).unwrap()[0], 1.0);
    }

    #[test]
    fn test_missed_event_warning() {
        // constant solution: one step covers the span and steps over the dip of the condition
        let problem = IVPProblem::new(
            |u: &DVector<f64>, _p: &(), _t: f64| DVector::zeros(u.len()),
            DVector::from_vec(vec![1.0]),
            (0.0, 1.0),
            (),
        );
        let config = SolverConfig {
            initial_step: Some(1.0),
            ..SolverConfig::default()
        };
        let callbacks = CallbackSet::new().with(EventDefinition::continuous(
            "dip",
            |t: f64, _u: &DVector<f64>| (t - 0.4) * (t - 0.6),
            |_ctx: &mut EventContext| {},
        ));
        let sol = solve(&problem, &Method::HeunEuler.stepper(), &config, &callbacks);
        assert_eq!(sol.retcode, ReturnCode::Success);
        assert_eq!(sol.stats.naccept, 1);
        assert!(sol.event_log.is_empty());
        assert_eq!(sol.warnings.len(), 1);
        assert_eq!(sol.warnings[0].name, "dip");
    }

    #[test]
    fn test_bouncing_ball_any_direction() {
        // same ball, default crossing direction: the root left on the post side
        // of the bounce must not fire again
        let problem = IVPProblem::new(
            |y: &DVector<f64>, g: &f64, _t: f64| DVector::from_vec(vec![y[1], -g]),
            DVector::from_vec(vec![10.0, 0.0]),
            (0.0, 5.0),
            9.81,
        );
        let callbacks = CallbackSet::new().with(EventDefinition::continuous(
            "ground",
            |_t: f64, y: &DVector<f64>| y[0],
            |ctx: &mut EventContext| {
                let v = ctx.state()[1];
                ctx.state_mut()[1] = -0.9 * v;
            },
        ));
        let sol = solve(&problem, &StepperKind::default(), &tight(), &callbacks);
        assert_eq!(sol.retcode, ReturnCode::Success);
        assert_eq!(sol.event_log.len(), 2);
        let t_hit = (2.0 * 10.0 / 9.81f64).sqrt();
        assert_relative_eq!(sol.event_log[0].t, t_hit, epsilon = 1e-7);
        // second impact after a flight of 2 * 0.9 * v_hit / g
        let t_second = t_hit + 2.0 * 0.9 * 9.81 * t_hit / 9.81;
        assert_relative_eq!(sol.event_log[1].t, t_second, epsilon = 1e-6);
        assert!(sol.u.iter().all(|u| u[0] > -1e-6));
    }

    #[test]
    fn test_discrete_event_at_continuous_event_time() {
        let problem = exponential_growth(1.0);
        let callbacks = CallbackSet::new()
            .with(EventDefinition::continuous(
                "half",
                |t: f64, _u: &DVector<f64>| t - 0.5,
                |_ctx: &mut EventContext| {},
            ))
            .with(EventDefinition::discrete(
                "at half",
                |t: f64, _u: &DVector<f64>| (t - 0.5).abs() < 1e-9,
                |_ctx: &mut EventContext| {},
            ));
        let sol = solve(&problem, &StepperKind::default(), &tight(), &callbacks);
        assert_eq!(sol.retcode, ReturnCode::Success);
        let names: Vec<&str> = sol.event_log.iter().map(|r| r.name.as_str()).collect();
        assert_eq!(names, vec!["half", "at half"]);
        assert_eq!(sol.event_log[0].t, sol.event_log[1].t);
    }

    /// Dormand-Prince steps without a native continuous extension.
    struct PlainDormandPrince;

    impl Stepper for PlainDormandPrince {
        fn name(&self) -> String {
            "plain DOPRI5".to_string()
        }
        fn order(&self) -> usize {
            DormandPrince.order()
        }
        fn supports_dense_output(&self) -> bool {
            false
        }
        fn step(
            &self,
            rhs: &dyn Fn(f64, &DVector<f64>) -> DVector<f64>,
            t: f64,
            y: &DVector<f64>,
            f0: &DVector<f64>,
            h: f64,
        ) -> StepOutcome {
            DormandPrince.step(rhs, t, y, f0, h)
        }
    }

    #[test]
    fn test_interpolant_follows_dense_output_support() {
        let problem = harmonic_oscillator(1.0);
        let native = solve(&problem, &StepperKind::default(), &tight(), &CallbackSet::new());
        assert!(native.segments().segments().iter().all(|s| s.interpolant().kind() == "dopri5"));

        let stepper = StepperKind::custom(PlainDormandPrince);
        let plain = solve(&problem, &stepper, &tight(), &CallbackSet::new());
        assert_eq!(plain.retcode, ReturnCode::Success);
        assert!(plain.segments().segments().iter().all(|s| s.interpolant().kind() == "hermite"));
        assert_relative_eq!(plain.evaluate(0.37).unwrap()[0], 0.37f64.cos(), epsilon = 1e-6);
    }
}
