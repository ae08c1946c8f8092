use chaos_criteria::{
    check_li_yorke, check_transitivity, generate_orbit, lyapunov_spectrum, periodic_point_density,
    ClassicSystem, DensityConfig, Domain, HenonParameters, Horizon, IntegratorConfig, LiYorkeConfig,
    LogisticParameters, LorenzParameters, LyapunovConfig, TransitivityConfig,
};
use std::time::Instant;

fn main() {
    println!("# Performance Benchmark Results\n");

    benchmark_orbit();
    benchmark_lyapunov();
    benchmark_density();
    benchmark_transitivity();
    benchmark_li_yorke();

    println!("\nBenchmark complete.");
}

fn benchmark_orbit() {
    println!("### Lorenz Orbit Integration (Dormand-Prince)\n");
    println!("| t_max | Samples | Time (ms) |");
    println!("|-------|---------|-----------|");

    let lorenz = LorenzParameters::default();
    let system = lorenz.system();
    let x0 = lorenz.initial_state();
    let config = IntegratorConfig::default();

    for &t_max in &[10.0, 50.0, 100.0] {
        let n_points = (t_max * 100.0) as usize;
        let start = Instant::now();
        let result = generate_orbit(&system, &x0, Horizon::Time { t_max, n_points }, &config);
        let duration = start.elapsed();

        match result {
            Ok(orbit) => println!(
                "| {} | {} | {:.2} |",
                t_max,
                orbit.len(),
                duration.as_secs_f64() * 1000.0
            ),
            Err(e) => println!("| {} | error: {} | - |", t_max, e),
        }
    }
    println!();
}

fn benchmark_lyapunov() {
    println!("### Lorenz Lyapunov Spectrum (Benettin/QR)\n");
    println!("| t_max | λ1 | λ2 | λ3 | Time (s) |");
    println!("|-------|----|----|----|----------|");

    let lorenz = LorenzParameters::default();
    let system = lorenz.system();
    let x0 = lorenz.initial_state();

    for &t_max in &[10.0, 50.0, 100.0] {
        let config = LyapunovConfig {
            t_max,
            ..LyapunovConfig::default()
        };
        let start = Instant::now();
        let result = lyapunov_spectrum(&system, &x0, &config);
        let duration = start.elapsed();

        match result {
            Ok(spectrum) => println!(
                "| {} | {:.4} | {:.4} | {:.4} | {:.4} |",
                t_max,
                spectrum.exponents[0],
                spectrum.exponents[1],
                spectrum.exponents[2],
                duration.as_secs_f64()
            ),
            Err(e) => println!("| {} | error: {} | | | - |", t_max, e),
        }
    }
    println!();
}

fn benchmark_density() {
    println!("### Hénon Periodic Point Density Grid Scaling\n");
    println!("| Grid | Seeds | Points (n=1,2,4) | Time (s) |");
    println!("|------|-------|------------------|----------|");

    let system = HenonParameters::default().system();
    let domain = match Domain::new(vec![-1.5, -0.5], vec![1.5, 0.5]) {
        Ok(domain) => domain,
        Err(e) => {
            println!("Error building domain: {}", e);
            return;
        }
    };

    for &resolution in &[10, 20, 40] {
        let config = DensityConfig {
            periods: vec![1, 2, 4],
            grid_resolution: resolution,
            ..DensityConfig::default()
        };
        let start = Instant::now();
        let result = periodic_point_density(&system, &domain, &config);
        let duration = start.elapsed();

        match result {
            Ok(report) => {
                let counts: Vec<String> = report.per_period.iter().map(|p| p.count.to_string()).collect();
                println!(
                    "| {} x {} | {} | {} | {:.4} |",
                    resolution,
                    resolution,
                    resolution * resolution,
                    counts.join(", "),
                    duration.as_secs_f64()
                );
            }
            Err(e) => println!("| {} | error: {} | | - |", resolution, e),
        }
    }
    println!();
}

fn benchmark_transitivity() {
    println!("### Logistic Map Transitivity\n");
    println!("| Seeds | Score | Time (ms) |");
    println!("|-------|-------|-----------|");

    let system = LogisticParameters::default().system();
    let domain = match Domain::interval(0.001, 0.999) {
        Ok(domain) => domain,
        Err(e) => {
            println!("Error building domain: {}", e);
            return;
        }
    };

    for &num_points in &[100, 500, 1000] {
        let config = TransitivityConfig {
            num_points,
            ..TransitivityConfig::default()
        };
        let start = Instant::now();
        let result = check_transitivity(&system, &domain, &config);
        let duration = start.elapsed();

        match result {
            Ok(report) => println!(
                "| {} | {:.4} | {:.2} |",
                num_points,
                report.score,
                duration.as_secs_f64() * 1000.0
            ),
            Err(e) => println!("| {} | error: {} | - |", num_points, e),
        }
    }
    println!();
}

fn benchmark_li_yorke() {
    println!("### Logistic Map Li-Yorke Verification\n");
    println!("| r | Period-3 Points | Scrambled Ratio | Chaotic | Time (s) |");
    println!("|---|-----------------|-----------------|---------|----------|");

    for &r in &[3.5, 3.83, 4.0] {
        let system = LogisticParameters { r }.system();
        let start = Instant::now();
        let result = check_li_yorke(&system, (0.0, 1.0), &LiYorkeConfig::default());
        let duration = start.elapsed();

        match result {
            Ok(report) => println!(
                "| {} | {} | {:.3} | {} | {:.4} |",
                r,
                report.period_3_points.len(),
                report.scrambled_ratio,
                report.satisfies_li_yorke,
                duration.as_secs_f64()
            ),
            Err(e) => println!("| {} | error: {} | | | - |", r, e),
        }
    }
    println!();
}
