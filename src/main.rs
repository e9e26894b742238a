mod monitor;

use clap::Parser;
use pstat_sim::{CommandError, Simulator};
use std::io::{self, BufRead, Read, Write};
use std::time::Duration;
use tracing_subscriber::EnvFilter;

const BAUD_RATES: [u32; 5] = [9600, 19200, 38400, 57600, 115200];
// Same size as the firmware's USBUART buffer.
const USB_BUFFER_SIZE: usize = 64;

#[derive(Parser)]
#[clap(about = "Simulates the PSoC potentiostat's USB command interface")]
struct Cli {
    /// Listen on this serial port instead of showing the menu.
    #[clap(long)]
    port: Option<String>,
    /// Baud rate used with --port.
    #[clap(long, default_value_t = 115200)]
    baud: u32,
    /// Open the monitor dashboard instead of showing the menu.
    #[clap(long)]
    monitor: bool,
}

// The main entry point for the command-line simulator application.
fn main() -> io::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("error")),
        )
        .with_writer(log_writer)
        .init();

    let cli = Cli::parse();

    // Create an instance of our simulator from the library.
    let mut simulator = Simulator::new();

    if let Some(port_name) = cli.port {
        return listen_on_port(&mut simulator, &port_name, cli.baud);
    }
    if cli.monitor {
        return monitor::run(&mut simulator);
    }

    println!("==================================");
    println!("  PSoC Potentiostat Simulator  ");
    println!("==================================");

    // Main menu loop.
    loop {
        println!("\nSelect mode:");
        println!("  1. Manual Command Input");
        println!("  2. Listen on Serial Port");
        println!("  3. Monitor");
        println!("  4. Exit");
        let choice = prompt("> ")?;

        match choice.trim() {
            "1" => run_manual_mode(&mut simulator)?,
            "2" => run_serial_mode(&mut simulator)?,
            "3" => monitor::run(&mut simulator)?,
            "4" => break,
            _ => eprintln!("[ERROR] Invalid choice. Please enter 1, 2, 3 or 4."),
        }
    }
    Ok(())
}

// Log lines go to stderr, except while the monitor has the screen.
fn log_writer() -> Box<dyn Write> {
    if monitor::owns_terminal() {
        Box::new(io::sink())
    } else {
        Box::new(io::stderr())
    }
}

// Prints a prompt and reads one line from stdin.
fn prompt(text: &str) -> io::Result<String> {
    print!("{text}");
    io::stdout().flush()?;
    let mut input = String::new();
    io::stdin().read_line(&mut input)?;
    Ok(input)
}

// Handles the manual command input mode.
fn run_manual_mode(simulator: &mut Simulator) -> io::Result<()> {
    println!("\n--- Manual Mode ---");
    println!("Enter commands, or type 'back' to return to the main menu.");
    print!("> ");
    io::stdout().flush()?;

    let stdin = io::stdin();
    for line in stdin.lock().lines() {
        let input = line?;
        let command = input.trim();

        if command == "back" {
            break;
        }

        if !command.is_empty() {
            process_and_display_command(simulator, command);
        }
        print!("> ");
        io::stdout().flush()?;
    }
    Ok(())
}

// Handles the serial port listening mode.
fn run_serial_mode(simulator: &mut Simulator) -> io::Result<()> {
    println!("\n--- Serial Mode ---");

    // List available serial ports.
    let ports = match serialport::available_ports() {
        Ok(ports) => ports,
        Err(e) => {
            eprintln!("[ERROR] Could not enumerate serial ports: {}", e);
            return Ok(());
        }
    };

    if ports.is_empty() {
        eprintln!("[ERROR] No serial ports found.");
        return Ok(());
    }

    println!("Available serial ports:");
    for (i, port) in ports.iter().enumerate() {
        println!("  {}: {}", i, port.port_name);
    }

    // Get user's choice of serial port.
    let port_choice = prompt("Select a port (number): ")?;
    let port_index: usize = match port_choice.trim().parse() {
        Ok(i) if i < ports.len() => i,
        _ => {
            eprintln!("[ERROR] Invalid port selection.");
            return Ok(());
        }
    };

    // Get user's choice of baud rate.
    println!("Available baud rates:");
    for (i, rate) in BAUD_RATES.iter().enumerate() {
        println!("  {}: {}", i, rate);
    }
    let baud_choice = prompt("Select a baud rate (number): ")?;
    let baud_rate = match baud_choice.trim().parse::<usize>() {
        Ok(i) if i < BAUD_RATES.len() => BAUD_RATES[i],
        _ => {
            eprintln!("[ERROR] Invalid baud rate selection.");
            return Ok(());
        }
    };

    if let Err(e) = listen_on_port(simulator, &ports[port_index].port_name, baud_rate) {
        eprintln!("[ERROR] {}", e);
    }
    Ok(())
}

// Answers commands arriving on a serial port until the process is stopped.
// Only fails if the port cannot be opened.
fn listen_on_port(simulator: &mut Simulator, port_name: &str, baud_rate: u32) -> io::Result<()> {
    // Open the selected serial port.
    let mut port = serialport::new(port_name, baud_rate)
        .timeout(Duration::from_millis(10))
        .open()
        .map_err(|e| {
            let e = io::Error::from(e);
            io::Error::new(e.kind(), format!("failed to open port '{port_name}': {e}"))
        })?;

    println!(
        "\nListening on {} at {} baud. Press Ctrl+C to exit.",
        port_name, baud_rate
    );
    tracing::info!(port = port_name, baud_rate, "serial port opened");

    let mut serial_buf: Vec<u8> = vec![0; USB_BUFFER_SIZE];
    let mut framer = CommandFramer::default();
    loop {
        let commands = match port.read(serial_buf.as_mut_slice()) {
            Ok(bytes_read) => framer.push(&serial_buf[..bytes_read]),
            // An unterminated command ends when the line goes quiet.
            Err(ref e) if e.kind() == io::ErrorKind::TimedOut => {
                framer.flush().into_iter().collect()
            }
            Err(e) => {
                eprintln!("[ERROR] Serial port error: {}", e);
                continue;
            }
        };

        for command in commands {
            println!("> Received: {}", command);
            if let Some(res) = process_and_display_command(simulator, &command) {
                if let Err(e) = port.write_all(res.as_bytes()) {
                    eprintln!("[ERROR] Failed to write to serial port: {}", e);
                }
            }
        }
    }
}

// Splits the serial byte stream into commands. A command ends at CR, LF or
// the NUL padding of a USB packet, or when a full packet has built up.
#[derive(Default)]
struct CommandFramer {
    pending: Vec<u8>,
}

impl CommandFramer {
    // Returns every command completed by `bytes`, keeping any partial one.
    fn push(&mut self, bytes: &[u8]) -> Vec<String> {
        let mut commands = Vec::new();
        for &byte in bytes {
            if matches!(byte, b'\r' | b'\n' | b'\0') {
                commands.extend(self.take());
                continue;
            }
            self.pending.push(byte);
            if self.pending.len() == USB_BUFFER_SIZE {
                commands.extend(self.take());
            }
        }
        commands
    }

    // Hands out the partial command, if any.
    fn flush(&mut self) -> Option<String> {
        self.take()
    }

    fn take(&mut self) -> Option<String> {
        let bytes = std::mem::take(&mut self.pending);
        let command = String::from_utf8_lossy(&bytes).trim().to_owned();
        (!command.is_empty()).then_some(command)
    }
}

// Common function to process a command string and print the output.
fn process_and_display_command(simulator: &mut Simulator, command: &str) -> Option<String> {
    match simulator.process_command(command) {
        Ok(Some(response)) => {
            println!("< {}", response);
            Some(response)
        }
        Ok(None) => {
            if command.starts_with('S') {
                println!("  run parameters: {}", simulator.run_params);
            }
            None
        }
        Err(e) => {
            match e {
                CommandError::Empty => eprintln!("[ERROR] Command is empty."),
                CommandError::UnknownCommand(c) => eprintln!("[ERROR] Command '{}' is not supported.", c),
                CommandError::InvalidParameter(c) => eprintln!("[ERROR] Command '{}' contains an invalid parameter.", c),
                CommandError::RunParams(e) => eprintln!("[ERROR] Invalid run parameters: {}.", e),
                CommandError::NoRunParams => eprintln!("[ERROR] Load run parameters with 'S|...' before starting a run."),
            }
            None
        }
    }
}
