use chaos_criteria::*;
use nalgebra::DVector;
use std::f64::consts::TAU;

fn logistic(r: f64) -> SystemDefinition {
    LogisticParameters { r }.system()
}

/// x'' + 0.5 x' + x = cos t; the periodic response x = 2 sin t passes through (0, 2).
fn forced_oscillator() -> SystemDefinition {
    SystemDefinition::flow(|t, s: &State| DVector::from_vec(vec![s[1], -0.5 * s[1] - s[0] + t.cos()]))
}

#[test]
fn test_logistic_li_yorke_verdicts() {
    let chaotic = check_li_yorke(&logistic(4.0), (0.0, 1.0), &LiYorkeConfig::default()).unwrap();
    assert!(chaotic.satisfies_li_yorke);
    assert!(chaotic.has_period_3);
    assert!(!chaotic.period_3_points.is_empty());

    let periodic = check_li_yorke(&logistic(3.5), (0.0, 1.0), &LiYorkeConfig::default()).unwrap();
    assert!(!periodic.satisfies_li_yorke, "{:?}", periodic.scrambled_ratio);
    assert!(periodic.period_3_points.is_empty());
}

#[test]
fn test_lorenz_spectrum_signs() {
    let lorenz = LorenzParameters::default();
    let spectrum = lyapunov_spectrum(&lorenz.system(), &lorenz.initial_state(), &LyapunovConfig::default()).unwrap();

    assert_eq!(spectrum.exponents.len(), 3);
    assert!(spectrum.largest().unwrap() > 0.0, "{:?}", spectrum.exponents);
    assert!(spectrum.sum() < 0.0, "{:?}", spectrum.exponents);
    assert!(spectrum.is_chaotic());
    assert!(spectrum.is_dissipative());

    let entropy = lyapunov_entropy(&spectrum, KS_TO_TOPOLOGICAL_FACTOR).unwrap();
    assert!(entropy.entropy > entropy.ks_entropy);
}

#[test]
fn test_locate_then_refine_is_idempotent() {
    let system = forced_oscillator();
    let located = locate_periodic_orbits(
        &system,
        &[DVector::from_vec(vec![0.0, 2.0])],
        &LocatorConfig {
            expected_period: 6.0,
            tolerance: 1e-4,
            ..LocatorConfig::default()
        },
    )
    .unwrap();
    assert_eq!(located.orbits.len(), 1, "{:?}", located.failures);
    let candidate = &located.orbits[0];
    let turns = candidate.period / TAU;
    assert!((turns - turns.round()).abs() < 1e-3, "period {}", candidate.period);

    let config = RefinerConfig {
        tolerance: 1e-8,
        max_iter: 20,
        ..RefinerConfig::default()
    };
    let first = refine_orbit(&system, &candidate.initial_point, candidate.period, &config).unwrap();
    assert!(first.converged, "{:?}", first);

    let second = refine_orbit(&system, &first.point, first.period, &config).unwrap();
    assert!(second.converged);
    assert!(second.iteration_count <= 2);
    assert!(second.final_error <= first.final_error);

    let stability = orbit_stability(&system, &second.point, second.period, &IntegratorConfig::tight()).unwrap();
    assert_eq!(stability.stability, StabilityType::Stable);
}

#[test]
fn test_box_counting_on_fixed_point_orbit() {
    let orbit = generate_orbit(
        &logistic(2.5),
        &DVector::from_vec(vec![0.6]),
        Horizon::Steps(200),
        &IntegratorConfig::default(),
    )
    .unwrap();
    let report = topological_entropy(orbit.states(), &EntropyConfig::default()).unwrap();

    match report {
        EntropyReport::BoxCounting(r) => {
            assert_eq!(r.occupied_boxes, 1);
            assert_eq!(r.shannon_entropy, 0.0);
            assert_eq!(r.entropy, 0.0);
        }
        other => panic!("unexpected report {:?}", other),
    }
}

#[test]
fn test_density_points_are_primitive() {
    let system = logistic(4.0);
    let domain = Domain::interval(0.0, 1.0).unwrap();
    let config = DensityConfig {
        periods: vec![1, 2, 3],
        ..DensityConfig::default()
    };
    let report = periodic_point_density(&system, &domain, &config).unwrap();
    assert!(report.total_points > 0);

    for count in &report.per_period {
        for x in &count.points {
            let image = system.iterate(x, count.period).unwrap();
            assert!((image - x).norm() < config.tolerance, "period {} at {:?}", count.period, x);
            for d in (1..count.period).filter(|d| count.period % d == 0) {
                let image = system.iterate(x, d).unwrap();
                assert!((image - x).norm() >= config.tolerance, "period {} point has period {}", count.period, d);
            }
        }
    }
}

#[test]
fn test_identity_map_is_not_transitive() {
    let identity = SystemDefinition::map(|x: &State| x.clone());
    let domain = Domain::new(vec![-1.0, -1.0, -1.0], vec![1.0, 1.0, 1.0]).unwrap();
    let report = check_transitivity(
        &identity,
        &domain,
        &TransitivityConfig {
            num_points: 1,
            seed: 7,
            ..TransitivityConfig::default()
        },
    )
    .unwrap();

    assert!(report.coverage_ratio < 1e-12);
    assert!(!report.is_transitive);
}

#[test]
fn test_expression_lorenz_matches_catalogue() {
    let params = LorenzParameters::default();
    let expressions = ExpressionSystem::flow(
        &["x", "y", "z"],
        &["sigma * (y - x)", "x * (rho - z) - y", "x * y - beta * z"],
    )
    .unwrap()
    .with_parameter("sigma", params.sigma)
    .unwrap()
    .with_parameter("rho", params.rho)
    .unwrap()
    .with_parameter("beta", params.beta)
    .unwrap()
    .into_system();

    let point = DVector::from_vec(vec![1.5, -2.0, 20.0]);
    let a = expressions.evaluate(0.0, &point).unwrap();
    let b = params.system().evaluate(0.0, &point).unwrap();
    assert!((a - b).norm() < 1e-12);
}

#[test]
fn test_time_map_of_contracting_flow() {
    // The time-1 map of x' = -x is x -> x / e.
    let flow = SystemDefinition::flow(|_t, x: &State| -x);
    let map = flow.time_map(1.0, IntegratorConfig::tight()).unwrap();
    let image = map.evaluate(0.0, &DVector::from_vec(vec![1.0])).unwrap();
    assert!((image[0] - (-1.0f64).exp()).abs() < 1e-8);

    let spectrum = map_lyapunov_spectrum(
        &map,
        &DVector::from_vec(vec![0.5]),
        &MapLyapunovConfig {
            n_iterations: 10,
            transient: 0,
            num_exponents: None,
        },
    )
    .unwrap();
    assert!((spectrum.largest().unwrap() + 1.0).abs() < 1e-3, "{:?}", spectrum.exponents);
}

#[test]
fn test_logistic_bifurcation_from_catalogue() {
    let config = BifurcationConfig {
        range: (2.5, 4.0),
        samples: 16,
        capture: 64,
        ..BifurcationConfig::default()
    };
    let data = bifurcation_data(logistic, &LogisticParameters::default().initial_state(), &config).unwrap();

    assert_eq!(data.param_values.len(), 16);
    assert!(data.captured_values.iter().all(|c| c.len() == 64));
    assert!(data.captured_values.iter().flatten().all(|v| (0.0..=1.0).contains(v)));
}

#[test]
fn test_reports_serialize() {
    let config = LiYorkeConfig::default();
    let json = serde_json::to_string(&config).unwrap();
    let back: LiYorkeConfig = serde_json::from_str(&json).unwrap();
    assert_eq!(back.num_points, config.num_points);
    assert_eq!(back.seed, config.seed);

    let report = check_li_yorke(
        &logistic(4.0),
        (0.0, 1.0),
        &LiYorkeConfig {
            num_samples: 20,
            num_iterations: 200,
            ..LiYorkeConfig::default()
        },
    )
    .unwrap();
    let json = serde_json::to_string(&report).unwrap();
    let back: LiYorkeReport = serde_json::from_str(&json).unwrap();
    assert_eq!(back.satisfies_li_yorke, report.satisfies_li_yorke);
    assert_eq!(back.period_3_points.len(), report.period_3_points.len());
    assert_eq!(back.pairs_analyzed, report.pairs_analyzed);

    let value: serde_json::Value = serde_json::to_value(
        periodic_point_density(&logistic(4.0), &Domain::interval(0.0, 1.0).unwrap(), &DensityConfig {
            periods: vec![1],
            ..DensityConfig::default()
        })
        .unwrap(),
    )
    .unwrap();
    assert_eq!(value["total_points"], 2);
}
