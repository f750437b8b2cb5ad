//! Reference data for the script selector. Order matters: it is the
//! tie-breaker whenever two candidates share a score.

/// Bumped whenever an entry, score, or ordering below changes.
pub const TABLE_VERSION: u32 = 3;

pub struct ActionSpec {
    pub name: &'static str,
    pub description: &'static str,
    pub score: f32,
}

const fn act(name: &'static str, description: &'static str, score: f32) -> ActionSpec {
    ActionSpec {
        name,
        description,
        score,
    }
}

pub struct ServiceEntry {
    pub service: &'static str,
    pub actions: &'static [ActionSpec],
}

const HTTP: &[ActionSpec] = &[
    act("http-title", "Fetch the page title of the web root", 0.95),
    act("http-headers", "Collect response headers from the web root", 0.85),
    act("http-methods", "List supported HTTP methods and flag risky ones", 0.75),
    act("http-server-header", "Report the Server header banner", 0.6),
];

const HTTPS: &[ActionSpec] = &[
    act("ssl-cert", "Retrieve the TLS certificate subject and validity", 0.95),
    act("ssl-enum-ciphers", "Enumerate TLS versions and cipher suites", 0.9),
    act("http-title", "Fetch the page title of the web root", 0.8),
];

const SSH: &[ActionSpec] = &[
    act("ssh-hostkey", "Show SSH host key fingerprints", 0.95),
    act("ssh-auth-methods", "List accepted authentication methods", 0.85),
    act("ssh2-enum-algos", "Enumerate key exchange, cipher and MAC algorithms", 0.8),
];

const FTP: &[ActionSpec] = &[
    act("ftp-anon", "Check whether anonymous login is allowed", 0.95),
    act("ftp-syst", "Query the SYST and STAT responses", 0.7),
    act("ftp-bounce", "Check whether FTP bounce scanning is possible", 0.65),
];

const SMTP: &[ActionSpec] = &[
    act("smtp-commands", "List EHLO extensions", 0.9),
    act("smtp-open-relay", "Test whether the server relays mail", 0.85),
    act("smtp-enum-users", "Enumerate users via VRFY/EXPN/RCPT", 0.6),
];

const DNS: &[ActionSpec] = &[
    act("dns-recursion", "Check whether recursion is enabled", 0.9),
    act("dns-nsid", "Retrieve the name server identifier", 0.8),
    act("dns-service-discovery", "Enumerate DNS-SD advertised services", 0.7),
];

const MYSQL: &[ActionSpec] = &[
    act("mysql-info", "Read the MySQL greeting: version, capabilities", 0.95),
    act("mysql-databases", "List databases (needs credentials)", 0.55),
    act("mysql-users", "List users (needs credentials)", 0.5),
];

const PGSQL: &[ActionSpec] = &[act("pgsql-databases", "List PostgreSQL databases", 0.7)];

const SMB: &[ActionSpec] = &[
    act("smb-os-discovery", "Identify OS, computer name and domain over SMB", 0.95),
    act("smb-protocols", "List supported SMB dialects", 0.85),
    act("smb-security-mode", "Report SMB signing and authentication mode", 0.8),
];

const POP3: &[ActionSpec] = &[
    act("pop3-capabilities", "List POP3 capabilities", 0.85),
    act("pop3-ntlm-info", "Leak host details through NTLM challenge", 0.6),
];

const IMAP: &[ActionSpec] = &[
    act("imap-capabilities", "List IMAP capabilities", 0.85),
    act("imap-ntlm-info", "Leak host details through NTLM challenge", 0.6),
];

const VNC: &[ActionSpec] = &[
    act("vnc-info", "Report protocol version and security types", 0.9),
    act("vnc-title", "Read the desktop name", 0.7),
];

const TELNET: &[ActionSpec] = &[
    act("telnet-encryption", "Check whether encryption is supported", 0.8),
    act("telnet-ntlm-info", "Leak host details through NTLM challenge", 0.7),
];

const RDP: &[ActionSpec] = &[
    act("rdp-enum-encryption", "Enumerate RDP security layers and encryption", 0.9),
    act("rdp-ntlm-info", "Leak host details through NTLM challenge", 0.8),
];

const AJP: &[ActionSpec] = &[
    act("ajp-methods", "List supported AJP methods", 0.8),
    act("ajp-request", "Issue a request over AJP", 0.6),
];

const SNMP: &[ActionSpec] = &[
    act("snmp-info", "Read SNMPv3 engine information", 0.85),
    act("snmp-sysdescr", "Read the system description", 0.85),
];

const LDAP: &[ActionSpec] = &[
    act("ldap-rootdse", "Read the LDAP root DSE", 0.9),
    act("ldap-search", "Run an anonymous LDAP search", 0.6),
];

const NFS: &[ActionSpec] = &[
    act("nfs-showmount", "List exported shares", 0.9),
    act("nfs-ls", "List files on exported shares", 0.75),
    act("nfs-statfs", "Report disk usage of exported shares", 0.6),
];

const ORACLE: &[ActionSpec] = &[
    act("oracle-tns-version", "Read the TNS listener version", 0.85),
    act("oracle-sid-brute", "Guess Oracle SIDs", 0.4),
];

const SIP: &[ActionSpec] = &[
    act("sip-methods", "List supported SIP methods", 0.8),
    act("sip-enum-users", "Enumerate SIP extensions", 0.5),
];

const RTSP: &[ActionSpec] = &[
    act("rtsp-methods", "List supported RTSP methods", 0.8),
    act("rtsp-url-brute", "Probe common stream URLs", 0.5),
];

const MONGODB: &[ActionSpec] = &[
    act("mongodb-info", "Read server build and status information", 0.9),
    act("mongodb-databases", "List databases", 0.7),
];

pub static SERVICE_TABLE: &[ServiceEntry] = &[
    ServiceEntry { service: "http", actions: HTTP },
    ServiceEntry { service: "https", actions: HTTPS },
    ServiceEntry { service: "https-alt", actions: HTTPS },
    ServiceEntry { service: "ssh", actions: SSH },
    ServiceEntry { service: "ftp", actions: FTP },
    ServiceEntry { service: "smtp", actions: SMTP },
    ServiceEntry { service: "dns", actions: DNS },
    ServiceEntry { service: "domain", actions: DNS },
    ServiceEntry { service: "mysql", actions: MYSQL },
    ServiceEntry { service: "postgresql", actions: PGSQL },
    ServiceEntry {
        service: "cslistener",
        actions: &[
            act("http-title", "Fetch the page title of the web root", 0.7),
            act("http-headers", "Collect response headers from the web root", 0.6),
        ],
    },
    ServiceEntry { service: "microsoft-ds", actions: SMB },
    ServiceEntry { service: "netbios-ssn", actions: SMB },
    ServiceEntry { service: "pop3", actions: POP3 },
    ServiceEntry { service: "imap", actions: IMAP },
    ServiceEntry { service: "vnc", actions: VNC },
    ServiceEntry { service: "telnet", actions: TELNET },
    ServiceEntry { service: "rdp", actions: RDP },
    ServiceEntry { service: "ms-wbt-server", actions: RDP },
    ServiceEntry { service: "ajp13", actions: AJP },
    ServiceEntry {
        service: "redis",
        actions: &[act("redis-info", "Read INFO output from Redis", 0.9)],
    },
    ServiceEntry { service: "mongodb", actions: MONGODB },
    ServiceEntry { service: "snmp", actions: SNMP },
    ServiceEntry { service: "ldap", actions: LDAP },
    ServiceEntry { service: "nfs", actions: NFS },
    ServiceEntry {
        service: "rpcbind",
        actions: &[act("rpcinfo", "List registered RPC programs", 0.85)],
    },
    ServiceEntry {
        service: "msrpc",
        actions: &[act("msrpc-enum", "Enumerate MSRPC endpoints", 0.75)],
    },
    ServiceEntry { service: "oracle-tns", actions: ORACLE },
    ServiceEntry { service: "sip", actions: SIP },
    ServiceEntry { service: "rtsp", actions: RTSP },
    ServiceEntry {
        service: "ipp",
        actions: &[act("cups-info", "List printers exposed by CUPS", 0.75)],
    },
    ServiceEntry {
        service: "upnp",
        actions: &[act("upnp-info", "Read UPnP device description", 0.8)],
    },
];

/// Service families matched by substring when there is no exact entry.
pub struct Category {
    pub name: &'static str,
    pub patterns: &'static [&'static str],
    pub services: &'static [&'static str],
}

pub static CATEGORIES: &[Category] = &[
    Category { name: "web", patterns: &["http", "www", "web"], services: &["http"] },
    Category { name: "tls", patterns: &["ssl", "tls", "https"], services: &["https"] },
    Category { name: "smb", patterns: &["smb", "netbios", "cifs", "microsoft-ds"], services: &["microsoft-ds"] },
    Category { name: "mail", patterns: &["smtp", "submission"], services: &["smtp"] },
    Category { name: "mailbox", patterns: &["pop3"], services: &["pop3"] },
    Category { name: "imap", patterns: &["imap"], services: &["imap"] },
    Category { name: "dns", patterns: &["dns", "domain"], services: &["dns"] },
    Category { name: "sql", patterns: &["mysql", "mariadb"], services: &["mysql"] },
    Category { name: "postgres", patterns: &["postgres", "pgsql"], services: &["postgresql"] },
    Category { name: "remote-shell", patterns: &["ssh"], services: &["ssh"] },
    Category { name: "remote-desktop", patterns: &["rdp", "wbt", "terminal"], services: &["rdp"] },
    Category { name: "vnc", patterns: &["vnc", "rfb"], services: &["vnc"] },
    Category { name: "file-transfer", patterns: &["ftp"], services: &["ftp"] },
    Category { name: "directory", patterns: &["ldap"], services: &["ldap"] },
    Category { name: "rpc", patterns: &["rpc"], services: &["rpcbind"] },
    Category { name: "nosql", patterns: &["mongo", "redis"], services: &["mongodb", "redis"] },
];

/// Well-known ports used when the engine could not name the service.
pub static PORT_HINTS: &[(u16, &str)] = &[
    (21, "ftp"),
    (22, "ssh"),
    (23, "telnet"),
    (25, "smtp"),
    (53, "domain"),
    (80, "http"),
    (110, "pop3"),
    (111, "rpcbind"),
    (135, "msrpc"),
    (139, "netbios-ssn"),
    (143, "imap"),
    (161, "snmp"),
    (389, "ldap"),
    (443, "https"),
    (445, "microsoft-ds"),
    (631, "ipp"),
    (1521, "oracle-tns"),
    (2049, "nfs"),
    (3306, "mysql"),
    (3389, "ms-wbt-server"),
    (5060, "sip"),
    (5432, "postgresql"),
    (5900, "vnc"),
    (6379, "redis"),
    (8009, "ajp13"),
    (8080, "http"),
    (8443, "https-alt"),
    (27017, "mongodb"),
];

pub static GENERIC_ACTIONS: &[ActionSpec] = &[
    act("banner", "Grab the service banner", 0.4),
    act("fingerprint-strings", "Print strings from unrecognised service fingerprints", 0.3),
];
