//! Target-platform detection and process-launcher command assembly.
//!
//! The platform decides which MPI launcher starts a run, whether the
//! launcher invocation embeds the process count (schedulers on the cx
//! machines supply it themselves), and how a coupled pair of executables
//! is started.

use std::env;
use std::fmt::{Display, Formatter};
use std::fs;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Platform {
    #[default]
    Local,
    Cx1,
    Cx2,
    Archer,
}

impl Platform {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Local => "local",
            Self::Cx1 => "cx1",
            Self::Cx2 => "cx2",
            Self::Archer => "archer",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        match name.trim().to_ascii_lowercase().as_str() {
            "local" => Some(Self::Local),
            "cx1" => Some(Self::Cx1),
            "cx2" => Some(Self::Cx2),
            "archer" => Some(Self::Archer),
            _ => None,
        }
    }

    /// Probe the machine hostname and classify it, defaulting to `Local`.
    pub fn detect() -> Self {
        Self::from_hostname(&local_hostname())
    }

    pub fn from_hostname(hostname: &str) -> Self {
        let hostname = hostname.to_ascii_lowercase();
        if hostname.contains("cx1") {
            Self::Cx1
        } else if hostname.contains("cx2") {
            Self::Cx2
        } else if hostname.contains("eslogin") {
            Self::Archer
        } else {
            Self::Local
        }
    }

    pub const fn uses_scheduler(self) -> bool {
        !matches!(self, Self::Local)
    }

    pub const fn launcher(self) -> &'static str {
        match self {
            Self::Local | Self::Cx1 | Self::Cx2 => "mpiexec",
            Self::Archer => "aprun",
        }
    }

    /// Whether the launcher invocation carries `-n <nprocs>` itself. The cx
    /// schedulers inject the process count from the job resources instead.
    pub const fn launcher_embeds_process_count(self) -> bool {
        match self {
            Self::Local | Self::Archer => true,
            Self::Cx1 | Self::Cx2 => false,
        }
    }

    /// Launcher prefix for a single executable, e.g. `mpiexec -n 8`.
    pub fn launch_prefix(self, nprocs: usize) -> String {
        if self.launcher_embeds_process_count() {
            format!("{} -n {}", self.launcher(), nprocs)
        } else {
            self.launcher().to_string()
        }
    }

    /// Command line starting a coupled pair of runs. Locally the dedicated
    /// coupler launcher owns both sides; under a scheduler the pair is
    /// expressed as an MPMD invocation of the plain launcher.
    pub fn coupled_command(
        self,
        md_nprocs: usize,
        md_command: &str,
        cfd_nprocs: usize,
        cfd_command: &str,
    ) -> String {
        match self {
            Self::Local => format!(
                "cplexec -m {} '{}' -c {} '{}'",
                md_nprocs, md_command, cfd_nprocs, cfd_command
            ),
            Self::Cx1 | Self::Cx2 => format!(
                "mpiexec heterostart -n {} {} : -n {} {}",
                md_nprocs, md_command, cfd_nprocs, cfd_command
            ),
            Self::Archer => format!(
                "aprun -n {} {} : -n {} {}",
                md_nprocs, md_command, cfd_nprocs, cfd_command
            ),
        }
    }
}

impl Display for Platform {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str((*self).as_str())
    }
}

fn local_hostname() -> String {
    if let Ok(name) = env::var("HOSTNAME") {
        if !name.is_empty() {
            return name;
        }
    }
    fs::read_to_string("/proc/sys/kernel/hostname")
        .map(|name| name.trim().to_string())
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hostnames_classify_by_substring_with_local_fallback() {
        let cases = [
            ("login.cx1.hpc.example.ac.uk", Platform::Cx1),
            ("cx2-node014", Platform::Cx2),
            ("eslogin006", Platform::Archer),
            ("workstation", Platform::Local),
            ("", Platform::Local),
        ];
        for (hostname, expected) in cases {
            assert_eq!(Platform::from_hostname(hostname), expected);
        }
    }

    #[test]
    fn launch_prefix_embeds_count_only_where_the_launcher_takes_it() {
        assert_eq!(Platform::Local.launch_prefix(8), "mpiexec -n 8");
        assert_eq!(Platform::Archer.launch_prefix(24), "aprun -n 24");
        assert_eq!(Platform::Cx1.launch_prefix(8), "mpiexec");
        assert_eq!(Platform::Cx2.launch_prefix(16), "mpiexec");
    }

    #[test]
    fn coupled_command_uses_cplexec_locally_and_mpmd_on_schedulers() {
        let local = Platform::Local.coupled_command(4, "./md -i md.in", 2, "./cfd cfd.in");
        assert_eq!(local, "cplexec -m 4 './md -i md.in' -c 2 './cfd cfd.in'");

        let archer = Platform::Archer.coupled_command(4, "./md -i md.in", 2, "./cfd cfd.in");
        assert_eq!(archer, "aprun -n 4 ./md -i md.in : -n 2 ./cfd cfd.in");
    }

    #[test]
    fn names_round_trip() {
        for platform in [
            Platform::Local,
            Platform::Cx1,
            Platform::Cx2,
            Platform::Archer,
        ] {
            assert_eq!(Platform::from_name(platform.as_str()), Some(platform));
        }
        assert_eq!(Platform::from_name("pbs"), None);
    }
}
