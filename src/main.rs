use clap::{Arg, ArgMatches, Command};
use itcz_postproc::{
    climatology::{compare_climatologies, write_comparison, DEFAULT_COMPARE_FIELDS},
    config::{pipeline_args, PipelineConfig},
    logging,
    stage::{for_each_run, RunPipeline, RunStage},
    PipelineError,
};
use tracing::{error, info};

fn main() {
    let matches = build_cli().get_matches();
    logging::init(matches.get_count("verbose"));

    let result = PipelineConfig::from_matches(&matches).and_then(|config| {
        match matches.subcommand() {
            Some(("normalize", _)) => for_each_run(&config, RunPipeline::normalize),
            Some(("eddy-terms", _)) => for_each_run(&config, RunPipeline::eddy_terms),
            Some(("climatology", _)) => for_each_run(&config, RunPipeline::climatology),
            Some(("daily", _)) => for_each_run(&config, |p| p.daily().map(|_| ())),
            Some(("run", sub_matches)) => run_to_stage(&config, sub_matches),
            Some(("compare", sub_matches)) => run_compare(&config, sub_matches),
            _ => Err(PipelineError::Configuration(
                "Please specify a subcommand. Use --help for more information.".to_string(),
            )),
        }
    });

    if let Err(e) = result {
        error!("{}", e);
        std::process::exit(1);
    }
}

fn run_to_stage(config: &PipelineConfig, matches: &ArgMatches) -> Result<(), PipelineError> {
    let target = matches
        .get_one::<String>("to")
        .map(|s| s.parse::<RunStage>())
        .transpose()?
        .unwrap_or(RunStage::Climatology);
    for_each_run(config, |pipeline| {
        let ran = pipeline.advance_to(target)?;
        info!(
            "{}: ran {} stage(s), now at {}",
            pipeline.corpus().run_tag(),
            ran.len(),
            target
        );
        Ok(())
    })
}

fn run_compare(config: &PipelineConfig, matches: &ArgMatches) -> Result<(), PipelineError> {
    let (Some(old_tag), Some(new_tag)) = (
        matches.get_one::<String>("old-tag"),
        matches.get_one::<String>("new-tag"),
    ) else {
        return Err(PipelineError::Configuration(
            "compare needs --old-tag and --new-tag".to_string(),
        ));
    };
    let fields: Vec<&str> = match matches.get_one::<String>("fields") {
        Some(list) => list.split(',').map(str::trim).filter(|f| !f.is_empty()).collect(),
        None => DEFAULT_COMPARE_FIELDS.to_vec(),
    };

    let files = &config.files;
    let old = config.run_dir(old_tag).join(&files.climatology);
    let new = config.run_dir(new_tag).join(&files.climatology);
    let diff = compare_climatologies(&old, &new, &fields)?;
    write_comparison(&diff, &config.run_dir(new_tag).join(&files.climatology_diff))
}

fn build_cli() -> Command {
    Command::new("itcz-postproc")
        .version(env!("CARGO_PKG_VERSION"))
        .about("Post-process Isca ITCZ-MIP runs into CMIP-style datasets and climatologies")
        .subcommand_required(true)
        .args(pipeline_args())
        .subcommand(Command::new("normalize").about("Normalize each month to CMIP names and units"))
        .subcommand(
            Command::new("eddy-terms")
                .about("Aggregate the normalized months and add transient eddy fluxes"),
        )
        .subcommand(
            Command::new("climatology")
                .about("Zonal and time mean climatology of the eddy-augmented dataset"),
        )
        .subcommand(Command::new("daily").about("Normalize the daily output of each run"))
        .subcommand(
            Command::new("run")
                .about("Advance each run through its stages, resuming from the stage marker")
                .arg(
                    Arg::new("to")
                        .long("to")
                        .value_name("STAGE")
                        .help("Last stage to run: normalized, aggregated, eddy-augmented or climatology")
                        .default_value("climatology"),
                ),
        )
        .subcommand(
            Command::new("compare")
                .about("Difference of two runs' climatologies")
                .arg(
                    Arg::new("old-tag")
                        .long("old-tag")
                        .value_name("TAG")
                        .allow_hyphen_values(true)
                        .required(true),
                )
                .arg(
                    Arg::new("new-tag")
                        .long("new-tag")
                        .value_name("TAG")
                        .allow_hyphen_values(true)
                        .required(true),
                )
                .arg(
                    Arg::new("fields")
                        .long("fields")
                        .value_name("FIELDS")
                        .help("Comma-separated climatology fields (default ts,prc)"),
                ),
        )
}
