//! Link bring-up scenarios driven with literal wire lines.

use slirc_services::config::Config;
use slirc_services::error::ProtocolError;
use slirc_services::link::Link;
use slirc_services::session::LinkState;

fn make_link() -> Link {
    let config = Config::parse(
        r##"
        hostname = "services.example"
        sendpass = "sendpass"
        recvpass = "goodpass"
        sid = "0AL"
        channels = ["#services", "#opers"]
    "##,
    )
    .unwrap();
    Link::new(config)
}

fn feed_capab(link: &mut Link) {
    for line in [
        "CAPAB START 1202",
        "CAPAB CHANMODES :ban=b inviteonly=i key=k limit=l moderated=m noextmsg=n op=@o topiclock=t voice=+v",
        "CAPAB USERMODES :invisible=i oper=o snomask=s wallops=w",
        "CAPAB CAPABILITIES :NICKMAX=32 CHANMAX=65 CHANMODES=Ibe,k,l,imnt USERMODES=,,s,iow PREFIX=(ov)@+",
        "CAPAB END",
    ] {
        link.feed_line(line).unwrap();
    }
}

/// Authenticate the uplink and finish both bursts.
fn handshake(link: &mut Link) {
    link.start().unwrap();
    feed_capab(link);
    link.feed_line("SERVER uplink.example goodpass 0 70M :Test uplink")
        .unwrap();
    link.feed_line(":70M BURST 1433044587").unwrap();
    link.feed_line(":70M ENDBURST").unwrap();
}

#[test]
fn test_handshake_emits_expected_sequence() {
    let mut link = make_link();
    link.start().unwrap();
    let out = link.drain_outbox();

    assert_eq!(out[0], "CAPAB START 1202");
    assert_eq!(out[1], "CAPAB CAPABILITIES :PROTOCOL=1202");
    assert_eq!(out[2], "CAPAB END");
    assert!(out[3].starts_with("SERVER services.example sendpass 0 0AL :PyLink Service"));
    assert!(out[4].starts_with(":0AL BURST "));
    assert!(
        out.iter()
            .any(|line| line.starts_with(":0AL UID 0ALAAAAAA ") && line.contains(" PyLink ")),
        "pseudoclient introduction missing: {:?}",
        out
    );
    assert!(out.contains(&":0AL ENDBURST".to_string()));
    assert!(out.iter().any(|line| line.contains("FJOIN #services ")));
    assert!(out.iter().any(|line| line.contains("FJOIN #opers ")));
}

#[test]
fn test_handshake_completes_on_endburst() {
    let mut link = make_link();
    handshake(&mut link);
    assert_eq!(link.session.state, LinkState::Linked);
    assert_eq!(link.session.uplink.as_deref(), Some("70M"));
}

#[test]
fn test_bad_recvpass_closes_link_without_further_writes() {
    let mut link = make_link();
    link.start().unwrap();
    link.drain_outbox();

    let err = link
        .feed_line("SERVER uplink.example badpass 0 70M :Test uplink")
        .unwrap_err();
    assert!(matches!(err, ProtocolError::BadReceivePassword { .. }));
    assert_eq!(link.session.state, LinkState::Closed);
    assert!(link.drain_outbox().is_empty());
}

#[test]
fn test_peer_error_is_fatal() {
    let mut link = make_link();
    handshake(&mut link);
    let err = link.feed_line("ERROR :Closing link (shutdown)").unwrap_err();
    assert!(matches!(err, ProtocolError::PeerError(_)));
    assert_eq!(link.session.state, LinkState::Closed);
}

#[test]
fn test_ping_answered_for_our_sid() {
    let mut link = make_link();
    handshake(&mut link);
    link.drain_outbox();

    link.feed_line(":70M PING 70M 0AL").unwrap();
    let out = link.drain_outbox();
    assert_eq!(out, vec![":0AL PONG 0AL 70M".to_string()]);

    // Pings for servers that are not ours are left alone.
    link.feed_line(":70M PING 70M 8XX").unwrap();
    assert!(link.drain_outbox().is_empty());
}

#[test]
fn test_kill_respawns_pseudoclient() {
    let mut link = make_link();
    handshake(&mut link);
    link.feed_line(":70M UID 70MAAAAAA 1429934638 oper real.example host.example oper 192.0.2.1 1429934638 +o + :An Oper")
        .unwrap();
    link.drain_outbox();

    assert_eq!(link.session.pseudoclient.as_deref(), Some("0ALAAAAAA"));
    link.feed_line(":70MAAAAAA KILL 0ALAAAAAA :test").unwrap();

    // The old UID is gone and a fresh pseudoclient took the next UID.
    assert!(link.session.net.get_user("0ALAAAAAA").is_none());
    assert_eq!(link.session.pseudoclient.as_deref(), Some("0ALAAAAAB"));
    let out = link.drain_outbox();
    assert!(out
        .iter()
        .any(|line| line.starts_with(":0AL UID 0ALAAAAAB ") && line.contains(" PyLink ")));
    assert!(out.iter().any(|line| line.contains("FJOIN #services ")));
    assert!(out.iter().any(|line| line.contains("FJOIN #opers ")));
}

#[test]
fn test_kick_rejoins_pseudoclient() {
    let mut link = make_link();
    handshake(&mut link);
    link.drain_outbox();

    link.feed_line(":70M KICK #services 0ALAAAAAA :begone")
        .unwrap();
    let channel = link.session.net.get_channel("#services").unwrap();
    assert!(channel.users.contains("0ALAAAAAA"));
    let out = link.drain_outbox();
    assert!(out
        .iter()
        .any(|line| line.starts_with(":0AL FJOIN #services ") && line.ends_with(",0ALAAAAAA")));
}

#[test]
fn test_malformed_lines_are_dropped_silently() {
    let mut link = make_link();
    handshake(&mut link);
    link.drain_outbox();

    link.feed_line("").unwrap();
    link.feed_line("PING").unwrap();
    link.feed_line(":70M").unwrap();
    assert_eq!(link.session.state, LinkState::Linked);
    assert!(link.drain_outbox().is_empty());
}
