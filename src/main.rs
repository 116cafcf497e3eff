use std::{env, error, fs, io::Read};

use serde::Deserialize;
use tracing::{error, info, warn};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::EnvFilter;

use emu::CortexM;
use emu::bus::FlatMemory;
use emu::cpu::config::CpuFeatures;
use emu::exception::{CpuException, ExceptionError};
use emu::nvic::NvicConfig;
use macros::acquire_lock;

#[derive(Debug, Deserialize)]
struct RamRange {
    base: u32,
    size: u32,
}

#[derive(Debug, Deserialize)]
struct SauEntry {
    base: u32,
    limit: u32,
    #[serde(default)]
    nsc: bool,
}

#[derive(Debug, Deserialize)]
struct Handler {
    exception: u32,
    address: u32,
}

/// Vector table placed at `base` and installed as VTOR of one security
/// state.
#[derive(Debug, Deserialize)]
struct VectorTable {
    secure: bool,
    base: u32,
    handlers: Vec<Handler>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct InitialRegisters {
    /// R0 upwards.
    general: Vec<u32>,
    pc: u32,
    msp: Option<u32>,
    psp: Option<u32>,
    msp_ns: Option<u32>,
    psp_ns: Option<u32>,
}

/// Synchronous exceptions a scenario can raise by name.
#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(rename_all = "snake_case")]
enum Raised {
    Undefined,
    InvalidState,
    StackOverflow,
    Unaligned,
    DivideByZero,
    SupervisorCall,
    Breakpoint,
}

impl From<Raised> for CpuException {
    fn from(value: Raised) -> Self {
        match value {
            Raised::Undefined => Self::Undefined,
            Raised::InvalidState => Self::InvalidState,
            Raised::StackOverflow => Self::StackOverflow,
            Raised::Unaligned => Self::Unaligned,
            Raised::DivideByZero => Self::DivideByZero,
            Raised::SupervisorCall => Self::SupervisorCall,
            Raised::Breakpoint => Self::Breakpoint,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
enum Event {
    Configure {
        exception: u32,
        secure: bool,
        priority: u8,
        #[serde(default)]
        target_non_secure: bool,
    },
    Pend {
        exception: u32,
        secure: bool,
    },
    Raise {
        exception: Raised,
    },
    /// The core checks for a pending exception between instructions.
    Enter,
    /// The handler executes `BX LR`.
    Return,
    WriteSpecial {
        sysm: u8,
        #[serde(default)]
        mask: u8,
        value: u32,
    },
    ReadSpecial {
        sysm: u8,
    },
    Bxns {
        dest: u32,
    },
    Blxns {
        dest: u32,
    },
    TestTarget {
        address: u32,
        #[serde(default)]
        op: u32,
    },
}

#[derive(Debug, Deserialize)]
struct Scenario {
    #[serde(default)]
    features: CpuFeatures,
    #[serde(default)]
    nvic: NvicConfig,
    ram: Vec<RamRange>,
    #[serde(default)]
    sau: Vec<SauEntry>,
    #[serde(default)]
    vectors: Vec<VectorTable>,
    #[serde(default)]
    registers: InitialRegisters,
    events: Vec<Event>,
}

impl Scenario {
    fn build(&self) -> CortexM {
        let mut bus = FlatMemory::new(self.features.has_security());
        for ram in &self.ram {
            bus = bus.with_ram(ram.base, ram.size);
        }
        for sau in &self.sau {
            bus = bus.with_sau_region(sau.base, sau.limit, sau.nsc);
        }
        for table in &self.vectors {
            for h in &table.handlers {
                if !bus.write_word(table.base + h.exception * 4, h.address) {
                    warn!("vector {} at 0x{:08X} is outside RAM", h.exception, table.base);
                }
            }
        }

        let mut cpu = CortexM::with_nvic_config(self.features, bus, self.nvic);
        for table in &self.vectors {
            if table.secure {
                cpu.state.banks.secure.vtor = table.base;
            } else {
                cpu.state.banks.non_secure.vtor = table.base;
            }
        }

        let regs = &self.registers;
        for (i, value) in regs.general.iter().take(13).enumerate() {
            cpu.state.registers.set_register_at(i, *value);
        }
        cpu.state.registers.set_program_counter(regs.pc);
        if let Some(msp) = regs.msp {
            cpu.state.set_msp(msp);
        }
        if let Some(psp) = regs.psp {
            cpu.state.set_psp(psp);
        }
        if let Some(msp) = regs.msp_ns {
            cpu.state.other_ss_msp = msp;
        }
        if let Some(psp) = regs.psp_ns {
            cpu.state.other_ss_psp = psp;
        }
        cpu
    }
}

fn step(cpu: &mut CortexM, event: &Event) -> Result<(), ExceptionError> {
    match *event {
        Event::Configure {
            exception,
            secure,
            priority,
            target_non_secure,
        } => {
            let nvic = cpu.nvic();
            acquire_lock!(nvic, nvic => {
                nvic.set_enabled(exception, secure, true);
                nvic.set_priority(exception, secure, priority);
                if target_non_secure {
                    nvic.set_target_non_secure(exception, true);
                }
            });
            Ok(())
        }
        Event::Pend { exception, secure } => cpu.pend(exception, secure),
        Event::Raise { exception } => cpu.raise(exception.into()),
        Event::Enter => cpu.on_exception_entry_request(),
        Event::Return => {
            let lr = cpu.state.registers.link_register();
            cpu.on_exception_return_magic_pc_write(lr & !1, lr & 1 != 0)
        }
        Event::WriteSpecial { sysm, mask, value } => {
            cpu.on_special_register_write(sysm, mask, value)
        }
        Event::ReadSpecial { sysm } => {
            let value = cpu.on_special_register_read(sysm);
            info!("MRS sysm={sysm} -> 0x{value:08X}");
            Ok(())
        }
        Event::Bxns { dest } => cpu.bxns(dest),
        Event::Blxns { dest } => cpu.blxns(dest),
        Event::TestTarget { address, op } => {
            match cpu.test_target(address, op) {
                Some(value) => info!("TT 0x{address:08X} -> 0x{value:08X}"),
                None => cpu.raise(CpuException::Undefined)?,
            }
            Ok(())
        }
    }
}

/// Replays every event, stopping at the first host-visible error.
fn run(cpu: &mut CortexM, events: &[Event]) -> Result<(), ExceptionError> {
    for (n, event) in events.iter().enumerate() {
        info!("#{n} {event:?}");
        step(cpu, event)?;
        info!(
            "   pc=0x{:08X} sp=0x{:08X} ipsr={} {}",
            cpu.state.registers.program_counter(),
            cpu.state.registers.stack_pointer(),
            cpu.state.exception,
            if cpu.state.secure() { "S" } else { "NS" },
        );
    }
    Ok(())
}

fn init_tracing(log_dir: Option<&str>) -> Option<WorkerGuard> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    match log_dir {
        Some(dir) => {
            let appender = tracing_appender::rolling::daily(dir, "mprofile.log");
            let (writer, guard) = tracing_appender::non_blocking(appender);
            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_writer(writer)
                .with_ansi(false)
                .init();
            Some(guard)
        }
        None => {
            tracing_subscriber::fmt().with_env_filter(filter).init();
            None
        }
    }
}

fn main() {
    let args = env::args().skip(1).collect::<Vec<String>>();

    let mut log_dir = None;
    let mut path = None;
    let mut it = args.iter();
    while let Some(arg) = it.next() {
        if arg == "--log-file" {
            log_dir = it.next().map(String::as_str);
        } else {
            path = Some(arg.as_str());
        }
    }

    let _guard = init_tracing(log_dir);
    info!("mprofile v0.1.0");

    let Some(path) = path else {
        error!("usage: mprofile [--log-file <dir>] <scenario.json>");
        std::process::exit(1)
    };

    let scenario = match load_scenario(path) {
        Ok(s) => s,
        Err(e) => {
            error!("{path}: {e}");
            std::process::exit(2);
        }
    };

    let mut cpu = scenario.build();
    let result = run(&mut cpu, &scenario.events);

    for transition in cpu.history().iter() {
        info!("{transition}");
    }
    if let Err(e) = result {
        error!("{e}");
        std::process::exit(3);
    }
}

fn load_scenario(filepath: &str) -> Result<Scenario, Box<dyn error::Error>> {
    let mut f = fs::File::open(filepath)?;
    let mut buf = String::new();
    f.read_to_string(&mut buf)?;

    Ok(serde_json::from_str(&buf)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use emu::exception::SVCALL;
    use emu::trace::TransitionKind;
    use pretty_assertions::assert_eq;

    const SCENARIO: &str = r#"{
        "features": {
            "arch": "V8M",
            "main_extension": true,
            "thumb_dsp": true,
            "security": { "init_svtor": 0 },
            "fpu": null,
            "init_nsvtor": 0
        },
        "ram": [{ "base": 536870912, "size": 8192 }],
        "vectors": [{
            "secure": true,
            "base": 536870912,
            "handlers": [{ "exception": 11, "address": 536876121 }]
        }],
        "registers": { "pc": 536875008, "msp": 536875008 },
        "events": [
            { "event": "pend", "exception": 11, "secure": true },
            { "event": "enter" },
            { "event": "read_special", "sysm": 5 },
            { "event": "return" }
        ]
    }"#;

    #[test]
    fn check_scenario_replay() {
        let scenario: Scenario = serde_json::from_str(SCENARIO).unwrap();
        let mut cpu = scenario.build();
        assert_eq!(cpu.state.registers.stack_pointer(), 0x2000_1000);

        run(&mut cpu, &scenario.events[..2]).unwrap();
        assert_eq!(cpu.state.exception, SVCALL);
        assert_eq!(cpu.state.registers.program_counter(), 0x2000_1458);
        assert_eq!(cpu.on_special_register_read(5), SVCALL);

        run(&mut cpu, &scenario.events[2..]).unwrap();
        assert_eq!(cpu.state.exception, 0);
        assert_eq!(cpu.state.registers.stack_pointer(), 0x2000_1000);
        let kinds: Vec<TransitionKind> = cpu.history().iter().map(|t| t.kind).collect();
        assert_eq!(kinds, vec![TransitionKind::Entry, TransitionKind::Return]);
    }

    #[test]
    fn check_unknown_event_is_rejected() {
        let bad = r#"{ "ram": [], "events": [{ "event": "reset" }] }"#;
        assert!(serde_json::from_str::<Scenario>(bad).is_err());
    }
}
