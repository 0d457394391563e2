use chrono::DateTime;

use crate::error::{Result, RioError};
use crate::fs::metadata::{Metadata, DEFAULT_TIME};

/// which defaults apply when a filter field is unset
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterPurpose {
    Pack,
    Unpack,
}

/// raw filter strings as they arrive from the cli
///
/// unset fields take purpose-dependent defaults during processing.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FilterSpec {
    pub uid: Option<String>,
    pub gid: Option<String>,
    pub mtime: Option<String>,
    pub sticky: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum IdPolicy {
    Keep,
    Mine,
    Set(u32),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum MtimePolicy {
    Keep,
    Set(i64),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum StickyPolicy {
    Keep,
    Zero,
}

/// processed filters, ready to apply to metadata in-stream
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Filters {
    uid: IdPolicy,
    gid: IdPolicy,
    mtime: MtimePolicy,
    sticky: StickyPolicy,
}

impl Filters {
    /// resolve a spec against the defaults for the given purpose
    ///
    /// pack defaults: uid/gid keep, mtime forced to the fixed epoch (for
    /// determinism), sticky keep. unpack defaults: uid/gid mine, mtime
    /// keep, sticky zero.
    pub fn process(spec: &FilterSpec, purpose: FilterPurpose) -> Result<Filters> {
        let (id_default, mtime_default, sticky_default) = match purpose {
            FilterPurpose::Pack => (IdPolicy::Keep, MtimePolicy::Set(DEFAULT_TIME), StickyPolicy::Keep),
            FilterPurpose::Unpack => (IdPolicy::Mine, MtimePolicy::Keep, StickyPolicy::Zero),
        };
        Ok(Filters {
            uid: match &spec.uid {
                Some(s) => parse_id(s)?,
                None => id_default,
            },
            gid: match &spec.gid {
                Some(s) => parse_id(s)?,
                None => id_default,
            },
            mtime: match &spec.mtime {
                Some(s) => parse_mtime(s)?,
                None => mtime_default,
            },
            sticky: match &spec.sticky {
                Some(s) => parse_sticky(s)?,
                None => sticky_default,
            },
        })
    }

    /// rewrite uid/gid/mtime/sticky in place; pure function of its inputs
    pub fn apply(&self, meta: &mut Metadata) {
        match self.uid {
            IdPolicy::Keep => {}
            IdPolicy::Mine => meta.uid = nix::unistd::geteuid().as_raw(),
            IdPolicy::Set(v) => meta.uid = v,
        }
        match self.gid {
            IdPolicy::Keep => {}
            IdPolicy::Mine => meta.gid = nix::unistd::getegid().as_raw(),
            IdPolicy::Set(v) => meta.gid = v,
        }
        match self.mtime {
            MtimePolicy::Keep => {}
            MtimePolicy::Set(sec) => {
                meta.mtime = sec;
                meta.mtime_nsec = 0;
            }
        }
        match self.sticky {
            StickyPolicy::Keep => {}
            StickyPolicy::Zero => meta.mode &= 0o777,
        }
    }
}

fn parse_id(s: &str) -> Result<IdPolicy> {
    match s {
        "keep" => Ok(IdPolicy::Keep),
        "mine" => Ok(IdPolicy::Mine),
        _ => s
            .parse::<u32>()
            .map(IdPolicy::Set)
            .map_err(|_| RioError::Usage(format!("invalid id filter {:?}: expected keep, mine, or an integer", s))),
    }
}

fn parse_mtime(s: &str) -> Result<MtimePolicy> {
    if s == "keep" {
        return Ok(MtimePolicy::Keep);
    }
    if let Some(unix) = s.strip_prefix('@') {
        return unix
            .parse::<i64>()
            .map(MtimePolicy::Set)
            .map_err(|_| RioError::Usage(format!("invalid mtime filter {:?}: bad unix timestamp", s)));
    }
    DateTime::parse_from_rfc3339(s)
        .map(|dt| MtimePolicy::Set(dt.timestamp()))
        .map_err(|_| {
            RioError::Usage(format!(
                "invalid mtime filter {:?}: expected keep, @<unix-seconds>, or an rfc3339 timestamp",
                s
            ))
        })
}

fn parse_sticky(s: &str) -> Result<StickyPolicy> {
    match s {
        "keep" => Ok(StickyPolicy::Keep),
        "zero" => Ok(StickyPolicy::Zero),
        _ => Err(RioError::Usage(format!(
            "invalid sticky filter {:?}: expected keep or zero",
            s
        ))),
    }
}
