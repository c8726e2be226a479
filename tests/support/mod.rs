use ailua::{CodeProposal, Console, ConsoleEvent, ConsoleInput};
use llm_provider::ProviderError;

/// Appends events and snapshots any approval request for the driver.
pub fn capture<'a>(
    events: &'a mut Vec<ConsoleEvent>,
    pending: &'a mut Option<CodeProposal>,
) -> impl FnMut(ConsoleEvent) + 'a {
    move |event| {
        if let ConsoleEvent::WaitingForApproval { proposal } = &event {
            *pending = Some(proposal.clone());
        }
        events.push(event);
    }
}

/// Drives one prompt to quiescence, auto-approving every proposal the way
/// an unattended front end would.
pub fn drive_to_idle(
    console: &mut Console,
    prompt: &str,
    agent_mode: bool,
) -> Result<Vec<ConsoleEvent>, ProviderError> {
    let mut events = Vec::new();
    let mut pending: Option<CodeProposal> = None;

    console.generate(prompt, agent_mode, &mut capture(&mut events, &mut pending))?;

    while let Some(proposal) = pending.take() {
        console.handle_input(
            ConsoleInput::ModelCode(proposal),
            &mut capture(&mut events, &mut pending),
        )?;
    }

    Ok(events)
}
