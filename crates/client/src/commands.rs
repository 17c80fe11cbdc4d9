use anyhow::{Context, Result, anyhow, bail};

use legion::world::{ModMaj, Word};
use legion::{Cmd, Coord, ModId, Speed};

/// One line typed at the prompt.
#[derive(Debug, PartialEq, Eq)]
pub enum Line {
    Cmd(Cmd),
    /// Print the mirrored state.
    Status,
    Help,
    Exit,
    Empty,
}

pub const HELP: &str = "\
commands:
  speed <paused|slow|fast|faster|fastest>
  save | load
  chunk <x> <y>
  io <io> <dst> [args...]
  user <name>
  mod <maj>.<ver>
  mod-register <name>
  mod-compile <maj> <file>
  mod-publish <maj>
  status | help | quit | exit";

pub fn parse(line: &str) -> Result<Line> {
    let mut words = line.split_whitespace();
    let Some(word) = words.next() else {
        return Ok(Line::Empty);
    };
    let rest: Vec<&str> = words.collect();

    let cmd = match (word, rest.as_slice()) {
        ("status", []) => return Ok(Line::Status),
        ("help", []) => return Ok(Line::Help),
        ("exit", []) => return Ok(Line::Exit),
        ("quit", []) => Cmd::Quit,
        ("save", []) => Cmd::Save,
        ("load", []) => Cmd::Load,
        ("speed", [speed]) => Cmd::Speed(speed.parse::<Speed>().map_err(|err| anyhow!(err))?),
        ("chunk", [x, y]) => Cmd::Chunk(Coord::new(number(x)?, number(y)?)),
        ("io", [io, dst, args @ ..]) => Cmd::Io {
            io: number(io)?,
            dst: number(dst)?,
            args: args.iter().map(|arg| number(arg)).collect::<Result<Vec<Word>>>()?,
        },
        ("user", [name]) => Cmd::User {
            server: 0,
            name: name.to_string(),
        },
        ("mod", [id]) => Cmd::ModSelect(mod_id(id)?),
        ("mod-register", [name]) => Cmd::ModRegister(name.to_string()),
        ("mod-compile", [maj, path]) => Cmd::ModCompile {
            maj: number(maj)?,
            source: std::fs::read_to_string(path).with_context(|| format!("reading {path}"))?,
        },
        ("mod-publish", [maj]) => Cmd::ModPublish(number::<ModMaj>(maj)?),
        _ => bail!("can't parse '{}', try 'help'", line.trim()),
    };
    Ok(Line::Cmd(cmd))
}

/// Decimal, or hex with a `0x` prefix.
fn number<T>(word: &str) -> Result<T>
where
    T: TryFrom<u64>,
{
    let value = match word.strip_prefix("0x") {
        Some(hex) => u64::from_str_radix(hex, 16),
        None => word.parse::<u64>(),
    }
    .with_context(|| format!("'{word}' is not a number"))?;
    T::try_from(value).map_err(|_| anyhow!("{word} is out of range"))
}

fn mod_id(word: &str) -> Result<ModId> {
    let (maj, ver) = word
        .split_once('.')
        .ok_or_else(|| anyhow!("expected <maj>.<ver>, got '{word}'"))?;
    Ok(ModId::new(number(maj)?, number(ver)?))
}
