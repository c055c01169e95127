use super::{report_result, TargetSpec};
use stratum_core::Engine;

pub fn run(engine: &Engine, target: &TargetSpec, json: bool) -> Result<u8, String> {
    let report = engine
        .create(
            &target.facts,
            &target.product_version,
            &target.instance,
            &target.mpm,
        )
        .map_err(|e| e.to_string())?;
    report_result(&report, json)
}
