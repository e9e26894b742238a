//! Terminal dashboard showing the simulated device while commands are typed in.

use std::collections::VecDeque;
use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use crossterm::event::{self, Event, KeyCode, KeyEventKind};
use crossterm::cursor::Show;
use crossterm::execute;
use crossterm::terminal::{
    disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen,
};
use pstat_sim::{ElectrodeConfig, Simulator};
use ratatui::backend::{Backend, CrosstermBackend};
use ratatui::layout::{Constraint, Direction, Layout};
use ratatui::text::Line;
use ratatui::widgets::{Block, Borders, List, Paragraph};
use ratatui::{Frame, Terminal};

const MAX_LOG_LINES: usize = 200;

// Set while the dashboard owns the terminal.
static SCREEN_ACTIVE: AtomicBool = AtomicBool::new(false);

/// Whether log output to stderr would draw over the dashboard.
pub fn owns_terminal() -> bool {
    SCREEN_ACTIVE.load(Ordering::Relaxed)
}

// Marks the dashboard active for as long as it lives and puts the terminal
// back into cooked mode on drop, whichever setup step failed.
struct ScreenGuard;

impl ScreenGuard {
    fn acquire() -> io::Result<Self> {
        SCREEN_ACTIVE.store(true, Ordering::Relaxed);
        let guard = ScreenGuard;
        enable_raw_mode()?;
        Ok(guard)
    }
}

impl Drop for ScreenGuard {
    fn drop(&mut self) {
        // Nothing useful to do if the terminal refuses to be restored.
        let _ = disable_raw_mode();
        let _ = execute!(io::stdout(), LeaveAlternateScreen, Show);
        SCREEN_ACTIVE.store(false, Ordering::Relaxed);
    }
}

#[derive(Default)]
struct MonitorState {
    input: String,
    log: VecDeque<String>,
}

impl MonitorState {
    fn push_log(&mut self, line: String) {
        if self.log.len() == MAX_LOG_LINES {
            self.log.pop_front();
        }
        self.log.push_back(line);
    }

    // Sends the typed command to the simulator and logs the exchange.
    fn submit(&mut self, simulator: &mut Simulator) {
        let input = std::mem::take(&mut self.input);
        let command = input.trim();
        if command.is_empty() {
            return;
        }

        self.push_log(format!("> {command}"));
        match simulator.process_command(command) {
            Ok(Some(response)) => self.push_log(format!("< {response}")),
            Ok(None) => {}
            Err(e) => self.push_log(format!("! {e}")),
        }
    }
}

/// Runs the dashboard until Esc is pressed, restoring the terminal afterwards.
pub fn run(simulator: &mut Simulator) -> io::Result<()> {
    let _guard = ScreenGuard::acquire()?;
    let mut stdout = io::stdout();
    execute!(stdout, EnterAlternateScreen)?;
    let mut terminal = Terminal::new(CrosstermBackend::new(stdout))?;
    event_loop(&mut terminal, simulator)
}

fn event_loop<B: Backend>(terminal: &mut Terminal<B>, simulator: &mut Simulator) -> io::Result<()> {
    let mut state = MonitorState::default();
    loop {
        terminal.draw(|frame| draw(frame, simulator, &state))?;

        if !event::poll(Duration::from_millis(250))? {
            continue;
        }
        let Event::Key(key) = event::read()? else {
            continue;
        };
        if key.kind != KeyEventKind::Press {
            continue;
        }
        match key.code {
            KeyCode::Esc => return Ok(()),
            KeyCode::Enter => state.submit(simulator),
            KeyCode::Backspace => {
                state.input.pop();
            }
            KeyCode::Char(c) => state.input.push(c),
            _ => {}
        }
    }
}

fn draw(frame: &mut Frame, simulator: &Simulator, state: &MonitorState) {
    let rows = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Length(11),
            Constraint::Min(3),
            Constraint::Length(3),
        ])
        .split(frame.size());
    let panels = Layout::default()
        .direction(Direction::Horizontal)
        .constraints([Constraint::Percentage(50), Constraint::Percentage(50)])
        .split(rows[0]);

    frame.render_widget(
        Paragraph::new(run_params_lines(simulator))
            .block(Block::default().borders(Borders::ALL).title("Run parameters")),
        panels[0],
    );
    frame.render_widget(
        Paragraph::new(device_lines(simulator))
            .block(Block::default().borders(Borders::ALL).title("Device")),
        panels[1],
    );

    // Only the newest lines that fit inside the border.
    let visible = usize::from(rows[1].height.saturating_sub(2));
    let skip = state.log.len().saturating_sub(visible);
    let log: Vec<&str> = state.log.iter().skip(skip).map(String::as_str).collect();
    frame.render_widget(
        List::new(log).block(Block::default().borders(Borders::ALL).title("Log")),
        rows[1],
    );

    frame.render_widget(
        Paragraph::new(format!("> {}", state.input))
            .block(Block::default().borders(Borders::ALL).title("Command (Esc to leave)")),
        rows[2],
    );
}

fn run_params_lines(simulator: &Simulator) -> Vec<Line<'static>> {
    if !simulator.has_run_params() {
        return vec![Line::from("no run parameters loaded, send S|XXXX|YYYY|ZZZZZ|AB")];
    }

    let params = &simulator.run_params;
    let command = params.encode().unwrap_or_else(|e| e.to_string());
    let mut lines = vec![
        Line::from(format!("command          {command}")),
        Line::from(format!("start value      {}", params.start_value)),
        Line::from(format!("end value        {}", params.end_value)),
        Line::from(format!("sweep type       {:?}", params.sweep_type)),
        Line::from(format!("start voltage    {:?}", params.start_volt_type)),
        Line::from(format!("timer period     {}", params.timer_period)),
    ];
    if params.use_swv {
        lines.push(Line::from(format!("swv increment    {}", params.swv_inc)));
        lines.push(Line::from(format!("swv pulse height {}", params.swv_pulse_height)));
    } else {
        lines.push(Line::from("square wave      off"));
    }
    lines
}

fn device_lines(simulator: &Simulator) -> Vec<Line<'static>> {
    let on_off = |flag: bool| if flag { "on" } else { "off" };
    let electrodes = match simulator.electrode_config {
        ElectrodeConfig::Two => 2,
        ElectrodeConfig::Three => 3,
    };
    let adc = &simulator.adc;

    vec![
        Line::from(format!("electrodes       {electrodes}")),
        Line::from(format!("dac value        {}", simulator.dac_value)),
        Line::from(format!(
            "pwm period/cmp   {}/{}",
            simulator.timer_period, simulator.timer_compare
        )),
        Line::from(format!(
            "adc config       {} gain x{}",
            adc.config,
            adc.buffer_gain()
        )),
        Line::from(match adc.tia_resistor_ohms() {
            Some(ohms) => format!("tia resistor     {ohms} ohm"),
            None => String::from("tia resistor     invalid"),
        }),
        Line::from(format!("hardware         {}", on_off(simulator.hardware_awake))),
        Line::from(format!("run              {}", on_off(simulator.run_in_progress))),
        Line::from(format!(
            "echo / tia short {} / {}",
            on_off(simulator.echo_usb),
            on_off(simulator.tia_shorted)
        )),
    ]
}
