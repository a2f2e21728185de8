use cartsync_config::{CartsyncConfig, MutationPolicy};
use cartsync_sim::{FaultConfig, Sim, SimConfig, SimReport};

pub struct SimArgs {
    pub seed: u64,
    pub steps: usize,
    pub error_rate: Option<f64>,
    pub fetch_error_rate: f64,
    pub burst_ratio: f64,
    pub policy: Option<MutationPolicy>,
    pub json: bool,
}

fn sim_config(config: &CartsyncConfig, args: &SimArgs) -> SimConfig {
    let error_rate = args
        .error_rate
        .or(config.service.failure_rate)
        .unwrap_or(0.0);
    let faults = (error_rate > 0.0 || args.fetch_error_rate > 0.0).then(|| FaultConfig {
        error_rate,
        fetch_error_rate: args.fetch_error_rate,
    });

    SimConfig {
        policy: args
            .policy
            .or(config.mutation.policy)
            .unwrap_or_default(),
        faults,
        burst_ratio: args.burst_ratio,
        ..SimConfig::default()
    }
}

/// Run the harness on its own single-threaded runtime with paused time so
/// a seed always replays the same interleaving.
fn run_blocking(seed: u64, steps: usize, config: SimConfig) -> std::io::Result<SimReport> {
    let rt = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()?;

    Ok(rt.block_on(async move {
        tokio::time::pause();
        let mut sim = Sim::with_config(seed, config).await;
        sim.run_report(steps).await
    }))
}

pub async fn run(config: &CartsyncConfig, args: SimArgs) -> Result<(), Box<dyn std::error::Error>> {
    let sim_config = sim_config(config, &args);
    tracing::info!(
        seed = args.seed,
        steps = args.steps,
        policy = %sim_config.policy,
        "starting simulation"
    );

    let (seed, steps) = (args.seed, args.steps);
    let report = tokio::task::spawn_blocking(move || run_blocking(seed, steps, sim_config)).await??;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        print_report(&report);
    }

    if !report.passed() {
        return Err(format!("simulation found {} violation(s)", report.violations.len()).into());
    }
    Ok(())
}

fn print_report(report: &SimReport) {
    println!("seed:        {}", report.seed);
    println!("steps:       {}", report.steps);
    println!(
        "mutations:   {} started, {} ok, {} failed ({:.1}%)",
        report.mutations.started,
        report.mutations.succeeded,
        report.mutations.failed,
        report.mutations.failure_rate()
    );
    println!(
        "rollbacks:   {} restored, {} with nothing to restore, {} abandoned",
        report.mutations.rollbacks, report.mutations.rollbacks_skipped, report.mutations.abandoned
    );
    println!(
        "faults:      {} mutation, {} fetch",
        report.faults.mutation_faults, report.faults.fetch_faults
    );

    if report.violations.is_empty() {
        println!("violations:  none");
        return;
    }
    println!("violations:  {}", report.violations.len());
    for v in &report.violations {
        println!("  step {} [{}] {}: {}", v.step, v.user, v.invariant, v.details);
    }
}
