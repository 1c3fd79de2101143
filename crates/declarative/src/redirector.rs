//! Port redirector provisioning.
//!
//! Applications never publish external ports themselves. The entry redirector
//! publishes every external endpoint and forwards it to the application over
//! the container network; the exit redirector listens on every requested
//! outbound port and forwards it to the remote target. Both are plain socat
//! containers whose rules are part of their build context, so a rule change
//! changes the fingerprint and rebuilds them.

use crate::types::{ApplicationDefinition, DesiredApplication, FileSource, OutputContext};
use std::collections::BTreeMap;

/// Inbound redirector container name.
pub const ENTRY_REDIRECTOR: &str = "infra_redirector_entry";
/// Outbound redirector container name.
pub const EXIT_REDIRECTOR: &str = "infra_redirector_exit";

const PLUGIN: &str = "infrastructure";

const INSTRUCTIONS: &str = "FROM alpine:3.20
RUN apk add --no-cache socat
COPY rules /etc/redirector/rules
COPY run.sh /usr/local/bin/run.sh
CMD [\"sh\", \"/usr/local/bin/run.sh\"]
";

const RUN_SCRIPT: &str = "#!/bin/sh
set -e
while read -r port target; do
    [ -z \"$port\" ] && continue
    socat TCP-LISTEN:\"$port\",fork,reuseaddr TCP:\"$target\" &
done < /etc/redirector/rules
wait
";

/// Listening port to `host:port` target
type Rules = BTreeMap<u16, String>;

/// Put the redirectors the desired set needs in front of it and make every
/// requester depend on them.
///
/// When two applications claim the same port the first one keeps it.
pub fn provision(desired: Vec<DesiredApplication>) -> Vec<DesiredApplication> {
    let mut entry = Rules::new();
    let mut exit = Rules::new();
    let mut machine = None;

    for (ctx, definition) in &desired {
        for endpoint in definition.endpoints.iter().filter(|e| e.external) {
            let target = format!("{}:{}", definition.name, endpoint.container_port);
            claim(&mut entry, endpoint.host_port, target, &definition.name);
            machine.get_or_insert_with(|| ctx.machine.clone());
        }
        for redirect in &definition.port_redirects {
            let target = format!("{}:{}", redirect.target_host, redirect.target_port);
            claim(&mut exit, redirect.port, target, &definition.name);
            machine.get_or_insert_with(|| ctx.machine.clone());
        }
    }

    let Some(machine) = machine else {
        return desired;
    };

    let mut provisioned = Vec::with_capacity(desired.len() + 2);
    if !entry.is_empty() {
        let mut definition = redirector(ENTRY_REDIRECTOR, &entry);
        for port in entry.keys() {
            definition = definition.with_endpoint(*port, *port, false);
        }
        provisioned.push((OutputContext::new(PLUGIN, machine.clone()), definition));
    }
    if !exit.is_empty() {
        provisioned.push((
            OutputContext::new(PLUGIN, machine),
            redirector(EXIT_REDIRECTOR, &exit),
        ));
    }

    provisioned.extend(desired.into_iter().map(|(ctx, mut definition)| {
        if definition.needs_entry_redirector() {
            definition = definition.depends_on(ENTRY_REDIRECTOR);
        }
        if definition.needs_exit_redirector() {
            definition = definition.depends_on(EXIT_REDIRECTOR);
        }
        (ctx, definition)
    }));
    provisioned
}

fn claim(rules: &mut Rules, port: u16, target: String, requester: &str) {
    match rules.get(&port) {
        Some(existing) if *existing != target => {
            log::warn!("Port {port} requested by {requester} is already redirected to {existing}");
        }
        Some(_) => {}
        None => {
            rules.insert(port, target);
        }
    }
}

fn redirector(name: &str, rules: &Rules) -> ApplicationDefinition {
    let rules_file: String = rules
        .iter()
        .map(|(port, target)| format!("{port} {target}\n"))
        .collect();
    ApplicationDefinition::new(name, INSTRUCTIONS)
        .with_file("rules", FileSource::Inline(rules_file.into_bytes()))
        .with_file("run.sh", FileSource::Inline(RUN_SCRIPT.as_bytes().to_vec()))
}
