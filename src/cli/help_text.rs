pub(super) const ROOT_LONG_ABOUT: &str = "\
Run integrit on remote sites and alert when their files change

integrit-remote keeps a known-good integrit database for each site it
manages. For every operation it uploads a fresh integrit binary and the site's
config over scp, runs integrit over ssh, and copies the resulting database
back. Checks that find changes send a single email alert and then adopt the
new state as the known-good baseline, so the same change is reported once.

CORE CONCEPTS:

  Sites:
    A site is any config-files/<site>.integrit.conf file. The config is an
    ordinary integrit config that also names the remote account to use:

      # Host: user@host.example.com

  Baselines:
    databases/<site>.integrit.known.cdb is the trusted database for a site.
    It is only replaced after a remote update has fully succeeded, and is
    replaced atomically.

  Remote working directory:
    integrit, <site>.integrit.conf, <site>.integrit.known.cdb and
    <site>.integrit.current.cdb live in the ssh login directory. They are
    overwritten on every run.

MODES:

  --init SITE
    Create the first baseline. Fails if SITE already has one.

  --update SITE
    Replace SITE's baseline with its current remote state. On failure the
    previous baseline is kept.

  --check SITE
    Compare SITE's remote state with its baseline. If integrit reports
    changed:, new: or deleted: entries, one alert is mailed and the site is
    re-baselined. If the alert cannot be sent the baseline is kept, so the
    next check alerts again. Requires --mailserver and --to (or the
    [mail] section of integrit-remote.toml).

  (no mode)
    List all sites with their config modification time and baseline state.

SETTINGS:

  An optional integrit-remote.toml in the working directory overrides the
  layout and provides mail defaults:

    config_dir = \"config-files\"
    database_dir = \"databases\"
    binary = \"bin/integrit\"

    [ssh]
    connect_timeout_secs = 30

    [mail]
    server = \"relay.example.com\"
    to = \"ops@example.com\"

  Command line mail options take precedence over the file.

AUTHENTICATION:

  ssh and scp run with BatchMode=yes. Keys and known_hosts entries for every
  site must already be in place.";

pub(super) const AFTER_HELP: &str = "\
EXIT STATUS:
  0    Success; for --check, no changes were found
  1    --check found changes (alert sent, site re-baselined)
  255  Any error";
