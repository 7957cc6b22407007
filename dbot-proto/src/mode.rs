//! A module pairing channel mode letters with their parameters.

use crate::isupport::{Isupport, ModeClass};

/// One mode letter from a MODE command, with its sign and, when the mode
/// consumes one, its parameter.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ModeChange {
    /// `true` for `+`, `false` for `-`.
    pub plus: bool,
    /// The mode letter.
    pub mode: char,
    /// The consumed parameter, when the mode's class takes one.
    pub param: Option<String>,
}

/// Pairs the letters of a mode string with the flat parameter list that
/// followed it, honoring the RFC 2811 classes: A and B always consume a
/// parameter, C only when setting, D never. Prefix-granting modes behave
/// like class B. Letters of unknown class stay parameterless.
pub fn parse_mode_changes(modestring: &str, params: &[String], isupport: &Isupport) -> Vec<ModeChange> {
    let mut changes = Vec::new();
    let mut params = params.iter();
    let mut plus = true;
    for c in modestring.chars() {
        match c {
            '+' => plus = true,
            '-' => plus = false,
            mode => {
                let takes_arg = if isupport.is_prefix_mode(mode) {
                    true
                } else {
                    match isupport.chanmode_class(mode) {
                        Some(ModeClass::A) | Some(ModeClass::B) => true,
                        Some(ModeClass::C) => plus,
                        Some(ModeClass::D) | None => false,
                    }
                };
                let param = if takes_arg { params.next().cloned() } else { None };
                changes.push(ModeChange { plus, mode, param });
            }
        }
    }
    changes
}

#[cfg(test)]
mod test {
    use super::{parse_mode_changes, ModeChange};
    use crate::isupport::Isupport;

    fn params(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn prefix_modes_consume_params() {
        let isupport = Isupport::default();
        let changes = parse_mode_changes("+ov", &params(&["alice", "bob"]), &isupport);
        assert_eq!(
            changes,
            vec![
                ModeChange {
                    plus: true,
                    mode: 'o',
                    param: Some("alice".into()),
                },
                ModeChange {
                    plus: true,
                    mode: 'v',
                    param: Some("bob".into()),
                },
            ]
        );
    }

    #[test]
    fn mixed_signs() {
        let isupport = Isupport::default();
        let changes = parse_mode_changes("+o-v", &params(&["alice", "bob"]), &isupport);
        assert!(changes[0].plus);
        assert!(!changes[1].plus);
        assert_eq!(changes[1].param, Some("bob".into()));
    }

    #[test]
    fn class_c_consumes_only_when_setting() {
        let mut isupport = Isupport::default();
        isupport.apply_tokens(["CHANMODES=beI,k,l,imnpst"]);
        let changes = parse_mode_changes("+l", &params(&["25"]), &isupport);
        assert_eq!(changes[0].param, Some("25".into()));
        let changes = parse_mode_changes("-l", &params(&[]), &isupport);
        assert_eq!(changes[0].param, None);
    }

    #[test]
    fn class_b_consumes_in_both_directions() {
        let mut isupport = Isupport::default();
        isupport.apply_tokens(["CHANMODES=beI,k,l,imnpst"]);
        let changes = parse_mode_changes("-k", &params(&["sekrit"]), &isupport);
        assert_eq!(changes[0].param, Some("sekrit".into()));
    }

    #[test]
    fn unknown_modes_stay_parameterless() {
        let isupport = Isupport::default();
        let changes = parse_mode_changes("+zo", &params(&["alice"]), &isupport);
        assert_eq!(changes[0].param, None);
        // The parameter goes to the prefix mode, not the unknown letter.
        assert_eq!(changes[1].param, Some("alice".into()));
    }

    #[test]
    fn missing_params_tolerated() {
        let isupport = Isupport::default();
        let changes = parse_mode_changes("+oo", &params(&["alice"]), &isupport);
        assert_eq!(changes[1].param, None);
    }
}
