//! Built-in test suites for the device shell
//!
//! The device answers `help`, `+prompt`/`+noprompt`, `resetpins`, and the
//! colon-separated `gpio:` and `adc:` command families. Malformed commands are
//! sent on purpose; the device is expected to print an error for them.

use super::Step;

/// Suite names accepted by [`suite`]
pub const SUITES: &[&str] = &["control", "gpio", "adc", "demo"];

/// Look up a built-in suite by name
pub fn suite(name: &str) -> Option<Vec<Step>> {
    match name.to_lowercase().as_str() {
        "control" | "ctl" => Some(control()),
        "gpio" => Some(gpio()),
        "adc" => Some(adc()),
        "demo" => Some(demo()),
        _ => None,
    }
}

/// Shell control handling: help, empty input, bare CRLF and Ctrl-D
pub fn control() -> Vec<Step> {
    vec![
        Step::note("Testing help command"),
        Step::send("help"),
        Step::note("Testing the empty string."),
        Step::send_bare(""),
        Step::note("Testing cr lf."),
        Step::send_bare("\r\n"),
        Step::note("Testing ctl-d (will restart shell)"),
        // Ctrl-D logs the shell out; it takes a few seconds to come back
        Step::send_bare("\x04"),
        Step::wait_ms(4500),
        Step::raw("\n\r"),
    ]
}

pub fn gpio() -> Vec<Step> {
    vec![
        Step::note("Set an output to floating."),
        Step::send("gpio:configure:porth:pin2:output:floating"),
        Step::note("Test extra spaces in command."),
        Step::send(" gpio : \tconfigure :p   orth:p\tin2:output:floa\t  \tt\t i n    g"),
        Step::note("Test bad command (should produce error)"),
        Step::send(" gpio "),
        Step::note("Test incomplete command (should produce error)"),
        Step::send("gpio:configure"),
        Step::note("Test configure command"),
        Step::send("gpio:configure:porti:pin10:output:floating"),
        Step::send("gpio:configure:porth:pin2:output:floating"),
        Step::note("Test set command"),
        Step::send("gpio:set:porth:pin2"),
        Step::send("gpio:set:porti:pin10"),
        Step::note("Test get command"),
        Step::send("gpio:get:porth:pin2"),
        Step::note("Test clear command"),
        Step::send("gpio:clear:porth:pin2"),
        Step::note("Test get command"),
        Step::send("gpio:get:porth:pin2"),
        Step::send("gpio:get:porti:pin10"),
        Step::note("Test set command"),
        Step::send("gpio:set:porth:pin2"),
        Step::note("Test resetpins command"),
        Step::send("resetpins"),
        Step::note("Test get command"),
        Step::send("gpio:get:porth:pin2"),
    ]
}

/// One-shot then continuous conversion for a named profile.
///
/// With `reselect`, the profile is selected again before the continuous run.
fn adc_profile(profile: &str, continuous_ms: u64, reselect: bool) -> Vec<Step> {
    let select = format!("adc:conf_adc1:profile:{}", profile);
    let mut steps = vec![
        Step::note(&format!("Test one shot with {} profile.", profile)),
        Step::send(&select),
        Step::send("adc:conf_adc1:oneshot"),
        Step::send("adc:start"),
        Step::send("adc:start"),
        Step::note(&format!(
            "Test continuous with {} profile for {} ms.",
            profile, continuous_ms
        )),
    ];
    if reselect {
        steps.push(Step::send(&select));
    }
    steps.extend([
        Step::send("adc:conf_adc1:continuous"),
        Step::send("adc:start"),
        Step::wait_ms(continuous_ms),
        Step::send("adc:stop"),
        Step::wait_ms(1000),
    ]);
    steps
}

pub fn adc() -> Vec<Step> {
    let mut steps = Vec::new();
    steps.extend(adc_profile("default", 1500, true));
    steps.extend(adc_profile("demo", 1000, false));
    steps.extend(adc_profile("pa", 1000, false));
    steps.extend([
        Step::note("Set the reference voltage to 2.5 volts."),
        Step::send("adc:conf_adc1:vref_mv(2500)"),
        Step::note("Test one shot with pa profile."),
        Step::send("adc:conf_adc1:oneshot"),
        Step::send("adc:start"),
        Step::wait_ms(500),
        Step::note("Reset the adc."),
        Step::send("adc:conf_adc1:reset"),
        Step::note("Confirm reset to default profile and one shot."),
        Step::send("adc:start"),
    ]);
    steps
}

/// Full walkthrough: control, gpio, adc, with the prompt turned off in between
pub fn demo() -> Vec<Step> {
    let mut steps = control();
    steps.extend([Step::raw("\r\n"), Step::wait_ms(2500)]);
    steps.extend([
        Step::note("Turn off the prompt."),
        Step::send("+noprompt"),
        Step::wait_ms(500),
        Step::raw("resetpins\r\n"),
        Step::wait_ms(500),
    ]);
    steps.extend(gpio());
    steps.extend([Step::raw("resetpins\r\n"), Step::send("+noprompt")]);
    steps.extend(adc());
    steps.extend([Step::note("Return the prompt."), Step::send("+prompt")]);
    steps
}
