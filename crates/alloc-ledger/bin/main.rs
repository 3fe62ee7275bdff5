use alloc_ledger::{call_site, Format, Retention, Tracker};
use clap::Parser;
use eyre::Result;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(
    version,
    about,
    long_about = "alloc-ledger demo: runs a few tracked allocations and prints the usage report"
)]
struct DemoArgs {
    #[arg(long, help = "Hide records whose allocation was fully released")]
    omit_freed: bool,

    #[arg(long, help = "Print the ledger snapshot as pretty JSON instead of tables")]
    json: bool,

    #[arg(long, help = "Drop records once their release has been recorded")]
    evict: bool,
}

#[derive(Debug, Default)]
struct Sample {
    id: i32,
    weight: f64,
    label: String,
}

fn shared_samples(tracker: &Tracker) -> Result<()> {
    let first = tracker.tracked_rc_at(
        Sample {
            id: 1,
            weight: 2.5,
            label: "first sample".to_string(),
        },
        call_site!(),
    )?;
    let alias = first.clone();
    println!(
        "id={}, weight={}, label='{}' ({} owners)",
        alias.id,
        alias.weight,
        alias.label,
        alloc_ledger::TrackedRc::strong_count(&first)
    );

    let _kept = tracker.tracked_rc_at(Sample::default(), call_site!())?;
    Ok(())
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let args = DemoArgs::parse();

    let retention = if args.evict {
        Retention::EvictOnMatch
    } else {
        Retention::KeepAll
    };
    let tracker = Tracker::builder().retention(retention).build();

    let mut ints = tracker.tracked_vec::<i32>();
    println!("{}", ints.len());
    for i in 0..20 {
        ints.push(i);
    }
    let mut doubles = tracker.tracked_vec::<f64>();
    doubles.try_reserve(10)?;

    println!(
        "\nfootprint of container allocation tracking: {} bytes.\n",
        tracker.pool_footprint()
    );

    let single = tracker.allocate(100i32)?;
    let array = tracker.allocate_array::<i32>(12000)?;
    let zeroed = tracker.allocate(0i32)?;
    unsafe {
        tracker.deallocate(single)?;
        tracker.deallocate_array(array)?;
        tracker.deallocate(zeroed)?;
    }

    shared_samples(&tracker)?;

    if args.json || tracker.format() != Format::Table {
        println!("{}", tracker.report_json(true)?);
    } else {
        tracker.generate_report(args.omit_freed, true);
    }

    Ok(())
}
