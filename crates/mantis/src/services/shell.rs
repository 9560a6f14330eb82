// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Canned shell responses shared by the SSH, Telnet, and ADB emulators.
//!
//! Lookup order: exact command match, then prefix match on the first token,
//! then the `cd`/`echo` specials, then "command not found".

/// Responses for the fake Ubuntu host behind SSH (`prod-web-01`).
pub const SSH_RESPONSES: &[(&str, &str)] = &[
    ("whoami", "root"),
    ("id", "uid=0(root) gid=0(root) groups=0(root)"),
    ("uname", "Linux"),
    ("uname -a", "Linux prod-web-01 5.15.0-91-generic #101-Ubuntu SMP x86_64 GNU/Linux"),
    ("hostname", "prod-web-01"),
    ("pwd", "/root"),
    ("ls", "backup.sh  config.bak  credentials.txt  database_dump.sql  logs"),
    (
        "ls -la",
        "total 68\n\
         drwx------  3 root root  4096 Jan 15 09:30 .\n\
         drwxr-xr-x 24 root root  4096 Jan 10 12:00 ..\n\
         -rw-------  1 root root   256 Jan 14 08:15 .bash_history\n\
         -rw-r--r--  1 root root  3106 Jan  5 10:00 .bashrc\n\
         -rwxr-xr-x  1 root root  8192 Jan 13 11:00 backup.sh\n\
         -rw-r--r--  1 root root  1024 Jan 12 14:22 config.bak\n\
         -rw-------  1 root root   256 Jan 14 08:15 credentials.txt\n\
         -rw-r--r--  1 root root 51200 Jan 15 09:30 database_dump.sql\n\
         drwxr-xr-x  2 root root  4096 Jan 11 16:45 logs",
    ),
    (
        "cat /etc/passwd",
        "root:x:0:0:root:/root:/bin/bash\n\
         daemon:x:1:1:daemon:/usr/sbin:/usr/sbin/nologin\n\
         bin:x:2:2:bin:/bin:/usr/sbin/nologin\n\
         sys:x:3:3:sys:/dev:/usr/sbin/nologin\n\
         www-data:x:33:33:www-data:/var/www:/usr/sbin/nologin\n\
         mysql:x:27:27:MySQL Server:/var/lib/mysql:/bin/false\n\
         sshd:x:74:74:sshd:/var/run/sshd:/usr/sbin/nologin",
    ),
    (
        "cat credentials.txt",
        "admin:P@ssw0rd2024!\ndb_user:mysql_r00t_pw\napi_key:sk-proj-abc123xyz",
    ),
    (
        "ifconfig",
        "eth0: flags=4163<UP,BROADCAST,RUNNING,MULTICAST>  mtu 1500\n\
         \x20       inet 10.0.1.15  netmask 255.255.255.0  broadcast 10.0.1.255\n\
         \x20       ether 02:42:0a:00:01:0f  txqueuelen 0  (Ethernet)",
    ),
    (
        "ip addr",
        "1: lo: <LOOPBACK,UP,LOWER_UP> mtu 65536 state UNKNOWN\n\
         \x20   inet 127.0.0.1/8 scope host lo\n\
         2: eth0: <BROADCAST,MULTICAST,UP,LOWER_UP> mtu 1500 state UP\n\
         \x20   inet 10.0.1.15/24 brd 10.0.1.255 scope global eth0",
    ),
    (
        "ps aux",
        "USER       PID %CPU %MEM    VSZ   RSS TTY      STAT START   TIME COMMAND\n\
         root         1  0.0  0.1 169316  9212 ?        Ss   Jan10   0:05 /sbin/init\n\
         root       456  0.0  0.0  72300  3432 ?        Ss   Jan10   0:00 /usr/sbin/sshd\n\
         mysql      789  0.1  2.1 1294512 173452 ?      Sl   Jan10   1:23 /usr/sbin/mysqld\n\
         www-data  1234  0.0  0.5 356812  42108 ?       S    Jan10   0:12 apache2 -k start\n\
         root      5678  0.0  0.0  21532  1244 pts/0    R+   09:30   0:00 ps aux",
    ),
    (
        "netstat -tlnp",
        "Active Internet connections (only servers)\n\
         Proto Recv-Q Send-Q Local Address           Foreign Address         State       PID/Program\n\
         tcp        0      0 0.0.0.0:22              0.0.0.0:*               LISTEN      456/sshd\n\
         tcp        0      0 0.0.0.0:80              0.0.0.0:*               LISTEN      1234/apache2\n\
         tcp        0      0 0.0.0.0:3306            0.0.0.0:*               LISTEN      789/mysqld\n\
         tcp        0      0 0.0.0.0:443             0.0.0.0:*               LISTEN      1234/apache2",
    ),
    (
        "env",
        "SHELL=/bin/bash\n\
         PATH=/usr/local/sbin:/usr/local/bin:/usr/sbin:/usr/bin:/sbin:/bin\n\
         HOME=/root\n\
         LOGNAME=root\n\
         USER=root\n\
         LANG=en_US.UTF-8\n\
         TERM=xterm-256color",
    ),
    ("uptime", " 09:30:15 up 5 days, 21:30,  1 user,  load average: 0.08, 0.03, 0.01"),
    (
        "df -h",
        "Filesystem      Size  Used Avail Use% Mounted on\n\
         /dev/sda1        50G   23G   25G  48% /\n\
         tmpfs           2.0G     0  2.0G   0% /dev/shm\n\
         /dev/sda2       100G   67G   28G  71% /var/lib/mysql",
    ),
    (
        "w",
        " 09:30:15 up 5 days, 21:30,  1 user,  load average: 0.08, 0.03, 0.01\n\
         USER     TTY      FROM             LOGIN@   IDLE   JCPU   PCPU WHAT\n\
         root     pts/0    attacker         09:30    0.00s  0.00s  0.00s w",
    ),
    (
        "history",
        "    1  apt update && apt upgrade -y\n\
         \x20   2  mysql -u root -p\n\
         \x20   3  vim /etc/apache2/sites-available/000-default.conf\n\
         \x20   4  systemctl restart apache2\n\
         \x20   5  cat /var/log/auth.log | tail -50\n\
         \x20   6  ./backup.sh\n\
         \x20   7  scp database_dump.sql backup@10.0.1.100:/backups/",
    ),
];

/// Responses for the fake gateway behind Telnet (`gateway-01`).
pub const TELNET_RESPONSES: &[(&str, &str)] = &[
    ("whoami", "root"),
    ("id", "uid=0(root) gid=0(root) groups=0(root)"),
    ("uname", "Linux"),
    ("uname -a", "Linux gateway-01 5.15.0-91-generic #101-Ubuntu SMP x86_64 GNU/Linux"),
    ("hostname", "gateway-01"),
    ("pwd", "/root"),
    ("ls", "backup.sh  config.bak  credentials.txt  database_dump.sql  logs"),
    (
        "ls -la",
        "total 68\n\
         drwx------  3 root root  4096 Jan 15 09:30 .\n\
         drwxr-xr-x 24 root root  4096 Jan 10 12:00 ..\n\
         -rw-------  1 root root   256 Jan 14 08:15 .bash_history\n\
         -rw-r--r--  1 root root  3106 Jan  5 10:00 .bashrc\n\
         -rwxr-xr-x  1 root root  8192 Jan 13 11:00 backup.sh\n\
         -rw-r--r--  1 root root  1024 Jan 12 14:22 config.bak\n\
         -rw-------  1 root root   256 Jan 14 08:15 credentials.txt\n\
         -rw-r--r--  1 root root 51200 Jan 15 09:30 database_dump.sql\n\
         drwxr-xr-x  2 root root  4096 Jan 11 16:45 logs",
    ),
    (
        "cat /etc/passwd",
        "root:x:0:0:root:/root:/bin/bash\n\
         daemon:x:1:1:daemon:/usr/sbin:/usr/sbin/nologin\n\
         bin:x:2:2:bin:/bin:/usr/sbin/nologin\n\
         www-data:x:33:33:www-data:/var/www:/usr/sbin/nologin\n\
         sshd:x:74:74:sshd:/var/run/sshd:/usr/sbin/nologin",
    ),
    (
        "cat credentials.txt",
        "admin:P@ssw0rd2024!\ndb_user:mysql_r00t_pw\napi_key:sk-proj-abc123xyz",
    ),
    (
        "ifconfig",
        "eth0: flags=4163<UP,BROADCAST,RUNNING,MULTICAST>  mtu 1500\n\
         \x20       inet 10.0.1.15  netmask 255.255.255.0  broadcast 10.0.1.255\n\
         \x20       ether 02:42:0a:00:01:0f  txqueuelen 0  (Ethernet)",
    ),
    (
        "ps aux",
        "USER       PID %CPU %MEM    VSZ   RSS TTY      STAT START   TIME COMMAND\n\
         root         1  0.0  0.1 169316  9212 ?        Ss   Jan10   0:05 /sbin/init\n\
         root       456  0.0  0.0  72300  3432 ?        Ss   Jan10   0:00 /usr/sbin/sshd\n\
         root      5678  0.0  0.0  21532  1244 pts/0    R+   09:30   0:00 ps aux",
    ),
    ("uptime", " 09:30:15 up 5 days, 21:30,  1 user,  load average: 0.08, 0.03, 0.01"),
    (
        "env",
        "SHELL=/bin/bash\n\
         PATH=/usr/local/sbin:/usr/local/bin:/usr/sbin:/usr/bin:/sbin:/bin\n\
         HOME=/root\n\
         USER=root",
    ),
    (
        "df -h",
        "Filesystem      Size  Used Avail Use% Mounted on\n\
         /dev/sda1        50G   23G   25G  48% /\n\
         tmpfs           2.0G     0  2.0G   0% /dev/shm",
    ),
    (
        "w",
        " 09:30:15 up 5 days, 21:30,  1 user,  load average: 0.08, 0.03, 0.01\n\
         USER     TTY      FROM             LOGIN@   IDLE   JCPU   PCPU WHAT\n\
         root     pts/0    attacker         09:30    0.00s  0.00s  0.00s w",
    ),
    (
        "netstat -tlnp",
        "Active Internet connections (only servers)\n\
         Proto Recv-Q Send-Q Local Address           Foreign Address         State       PID/Program\n\
         tcp        0      0 0.0.0.0:22              0.0.0.0:*               LISTEN      456/sshd\n\
         tcp        0      0 0.0.0.0:23              0.0.0.0:*               LISTEN      789/telnetd\n\
         tcp        0      0 0.0.0.0:80              0.0.0.0:*               LISTEN      1234/apache2",
    ),
    (
        "history",
        "    1  apt update && apt upgrade -y\n\
         \x20   2  vim /etc/network/interfaces\n\
         \x20   3  systemctl restart networking\n\
         \x20   4  cat /var/log/auth.log | tail -50\n\
         \x20   5  ./backup.sh",
    ),
];

/// Responses for the fake Android device behind ADB (`panther`).
pub const ADB_RESPONSES: &[(&str, &str)] = &[
    (
        "id",
        "uid=0(root) gid=0(root) groups=0(root),1004(input),1007(log),1011(adb),1015(sdcard_rw),1028(sdcard_r),3001(net_bt_admin),3002(net_bt),3003(inet),3006(net_bw_stats),3009(readproc),3011(uhid)",
    ),
    ("whoami", "root"),
    (
        "uname -a",
        "Linux localhost 5.15.104-android14-8-00001-g123abc #1 SMP PREEMPT Fri Oct 6 2023 aarch64",
    ),
    ("getprop ro.build.version.release", "14"),
    ("getprop ro.product.model", "Pixel 7"),
    ("getprop ro.product.device", "panther"),
    ("getprop ro.build.display.id", "UP1A.231005.007"),
    ("getprop ro.serialno", "28161FDH2000GT"),
    (
        "pm list packages",
        "package:com.android.providers.telephony\n\
         package:com.android.providers.calendar\n\
         package:com.android.providers.media\n\
         package:com.android.wallpapercropper\n\
         package:com.android.documentsui\n\
         package:com.google.android.apps.maps\n\
         package:com.google.android.gms\n\
         package:com.google.android.apps.photos\n\
         package:com.android.chrome\n\
         package:com.whatsapp\n\
         package:com.android.vending",
    ),
    (
        "ls /sdcard/",
        "Alarms\nAndroid\nDCIM\nDocuments\nDownload\nMovies\nMusic\nNotifications\nPictures\nPodcasts\nRingtones",
    ),
    (
        "ls /data/data/",
        "com.android.providers.telephony\n\
         com.android.providers.media\n\
         com.google.android.gms\n\
         com.android.chrome\n\
         com.whatsapp",
    ),
    (
        "cat /proc/cpuinfo",
        "processor\t: 0\n\
         BogoMIPS\t: 38.40\n\
         Features\t: fp asimd evtstrm aes pmull sha1 sha2 crc32 atomics\n\
         CPU implementer\t: 0x41\n\
         CPU architecture: 8\n\
         CPU variant\t: 0x1\n\
         CPU part\t: 0xd05\n\
         CPU revision\t: 0",
    ),
    (
        "df -h",
        "Filesystem      Size  Used Avail Use% Mounted on\n\
         /dev/block/dm-0  5.8G  4.2G  1.4G  76% /\n\
         tmpfs           3.7G  1.1M  3.7G   1% /dev\n\
         /dev/block/dm-6  246G   89G  157G  37% /data\n\
         /dev/fuse       246G   89G  157G  37% /sdcard",
    ),
    (
        "dumpsys battery",
        "Current Battery Service state:\n\
         \x20 AC powered: false\n\
         \x20 USB powered: true\n\
         \x20 Wireless powered: false\n\
         \x20 Max charging current: 500000\n\
         \x20 status: 5\n\
         \x20 health: 2\n\
         \x20 present: true\n\
         \x20 level: 87\n\
         \x20 scale: 100\n\
         \x20 voltage: 4234\n\
         \x20 temperature: 275\n\
         \x20 technology: Li-ion",
    ),
    (
        "settings list secure",
        "android_id=a1b2c3d4e5f6g7h8\n\
         bluetooth_address=AA:BB:CC:DD:EE:FF\n\
         install_non_market_apps=1\n\
         lock_screen_lock_after_timeout=5000",
    ),
    (
        "ifconfig wlan0",
        "wlan0     Link encap:Ethernet  HWaddr AA:BB:CC:DD:EE:FF\n\
         \x20         inet addr:192.168.1.142  Bcast:192.168.1.255  Mask:255.255.255.0\n\
         \x20         UP BROADCAST RUNNING MULTICAST  MTU:1500  Metric:1",
    ),
    (
        "netstat -tlnp",
        "Active Internet connections (only servers)\n\
         Proto Recv-Q Send-Q Local Address           Foreign Address         State       PID/Program\n\
         tcp        0      0 0.0.0.0:5555            0.0.0.0:*               LISTEN      1234/adbd",
    ),
    (
        "ps",
        "USER      PID   PPID  VSIZE  RSS   WCHAN    PC        NAME\n\
         root      1     0     10632  776   SyS_epoll 0000000000 S /init\n\
         root      234   1     14520  1336  poll_sch  0000000000 S /sbin/adbd\n\
         system    456   1     1803456 65432 SyS_epoll 0000000000 S system_server\n\
         u0_a12    1234  456   1024564 43210 SyS_epoll 0000000000 S com.google.android.gms",
    ),
];

/// Exact match, then prefix match on the table key's first token.
pub fn lookup(
    table: &'static [(&'static str, &'static str)],
    command: &str,
) -> Option<&'static str> {
    for (key, value) in table {
        if *key == command {
            return Some(value);
        }
    }
    let first = command.split_whitespace().next()?;
    for (key, value) in table {
        if key.split_whitespace().next() == Some(first) {
            return Some(value);
        }
    }
    None
}

/// Full bash-flavored response: canned lookup, `cd`/`echo` specials, or
/// "command not found".
pub fn bash_response(table: &'static [(&'static str, &'static str)], command: &str) -> String {
    if let Some(canned) = lookup(table, command) {
        return canned.to_owned();
    }
    if command.starts_with("cd ") || command == "cd" {
        return String::new();
    }
    if let Some(rest) = command.strip_prefix("echo ") {
        return rest.to_owned();
    }
    let name = command.split_whitespace().next().unwrap_or(command);
    format!("-bash: {name}: command not found")
}

/// Android `sh`-flavored response used by the ADB emulator.
pub fn android_response(command: &str) -> String {
    if let Some(canned) = lookup(ADB_RESPONSES, command) {
        return canned.to_owned();
    }
    if command.starts_with("cd ") || command == "cd" {
        return String::new();
    }
    if let Some(rest) = command.strip_prefix("echo ") {
        return rest.to_owned();
    }
    let name = command.split_whitespace().next().unwrap_or(command);
    format!("/system/bin/sh: {name}: not found")
}

#[cfg(test)]
#[path = "shell_tests.rs"]
mod tests;
