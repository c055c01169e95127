use super::{json_pretty, TargetSpec, EXIT_SUCCESS};
use serde::Serialize;
use stratum_core::Engine;
use stratum_plan::{Action, Resource, Timing};
use stratum_profile::Profile;

#[derive(Serialize)]
struct PlanOutput<'a> {
    action: Action,
    profile: &'a Profile,
    resources: Vec<&'a Resource>,
}

pub fn run(engine: &Engine, action: Action, target: &TargetSpec, json: bool) -> Result<u8, String> {
    let (profile, set) = engine
        .plan(
            action,
            &target.facts,
            &target.product_version,
            &target.instance,
            &target.mpm,
        )
        .map_err(|e| e.to_string())?;

    if json {
        let output = PlanOutput {
            action,
            profile: &profile,
            resources: set.iter().collect(),
        };
        println!("{}", json_pretty(&output)?);
        return Ok(EXIT_SUCCESS);
    }

    println!(
        "{action} plan for {} ({} {} on {}, {} resources)",
        profile.service_name,
        profile.version,
        profile.instance,
        profile.channel,
        set.len()
    );
    for resource in &set {
        // ActionVerb's Display ignores width flags; pad the rendered string.
        let mut line = format!("  {:<8} {}", resource.verb.to_string(), resource.id);
        if resource.passive {
            line.push_str("  [passive]");
        }
        if resource.guard.is_some() {
            line.push_str("  [guarded]");
        }
        for n in &resource.notifies {
            let timing = match n.timing {
                Timing::Immediate => "immediately",
                Timing::Delayed => "delayed",
            };
            line.push_str(&format!("  ~> {} {} ({timing})", n.verb, n.target));
        }
        println!("{line}");
    }
    Ok(EXIT_SUCCESS)
}
