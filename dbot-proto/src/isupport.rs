//! The RPL_ISUPPORT (005) tokens the client tracks.

/// The RFC 2811 channel-mode classes advertised through `CHANMODES`.
///
/// Classes A and B always take a parameter, class C only when the mode is
/// being set, class D never. Prefix-granting modes are not listed in
/// `CHANMODES`; they behave like class B.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ModeClass {
    /// Mode A: list modes such as bans.
    A,
    /// Mode B: modes with a parameter in both directions, such as the key.
    B,
    /// Mode C: modes with a parameter only when set, such as the limit.
    C,
    /// Mode D: parameterless flags.
    D,
}

/// The subset of server feature advertisements the client uses: the prefix
/// table, the channel-name sigils, and the channel-mode classes.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Isupport {
    /// `(mode letter, prefix symbol)` pairs, highest rank first.
    prefix: Vec<(char, char)>,
    chantypes: Vec<char>,
    chanmodes: [Vec<char>; 4],
}

impl Default for Isupport {
    fn default() -> Isupport {
        Isupport {
            prefix: vec![('q', '~'), ('a', '&'), ('o', '@'), ('h', '%'), ('v', '+')],
            chantypes: vec!['#', '&', '+', '!'],
            chanmodes: [vec![], vec![], vec![], vec![]],
        }
    }
}

impl Isupport {
    /// Applies RPL_ISUPPORT tokens of the form `KEY=VALUE`. Unknown keys and
    /// malformed values are ignored; the defaults stay in place until a
    /// well-formed override arrives.
    pub fn apply_tokens<'a, I>(&mut self, tokens: I)
    where
        I: IntoIterator<Item = &'a str>,
    {
        for token in tokens {
            match token.split_once('=') {
                Some(("PREFIX", value)) => {
                    if let Some(prefix) = parse_prefix(value) {
                        self.prefix = prefix;
                    }
                }
                Some(("CHANTYPES", value)) => {
                    self.chantypes = value.chars().collect();
                }
                Some(("CHANMODES", value)) => {
                    let mut groups = value.split(',').map(|g| g.chars().collect());
                    if let (Some(a), Some(b), Some(c), Some(d)) =
                        (groups.next(), groups.next(), groups.next(), groups.next())
                    {
                        self.chanmodes = [a, b, c, d];
                    }
                }
                _ => {}
            }
        }
    }

    /// The prefix symbol granted by a mode letter, e.g. `o` -> `@`.
    pub fn symbol_for(&self, mode: char) -> Option<char> {
        self.prefix
            .iter()
            .find(|(m, _)| *m == mode)
            .map(|(_, s)| *s)
    }

    /// Whether the mode letter grants a nickname prefix.
    pub fn is_prefix_mode(&self, mode: char) -> bool {
        self.prefix.iter().any(|(m, _)| *m == mode)
    }

    /// Whether the character is a nickname prefix symbol, e.g. `@`.
    pub fn is_prefix_symbol(&self, symbol: char) -> bool {
        self.prefix.iter().any(|(_, s)| *s == symbol)
    }

    /// The rank of a prefix symbol. Higher outranks lower; an unknown
    /// symbol (or the absence of one) ranks 0. With the default table,
    /// `~` is 5 and `+` is 1.
    pub fn rank_of(&self, symbol: char) -> usize {
        self.prefix
            .iter()
            .position(|(_, s)| *s == symbol)
            .map(|i| self.prefix.len() - i)
            .unwrap_or(0)
    }

    /// The class of a channel mode letter, per the `CHANMODES` groups.
    /// Prefix-granting modes are not part of `CHANMODES` and return `None`.
    pub fn chanmode_class(&self, mode: char) -> Option<ModeClass> {
        const CLASSES: [ModeClass; 4] = [ModeClass::A, ModeClass::B, ModeClass::C, ModeClass::D];
        self.chanmodes
            .iter()
            .zip(CLASSES)
            .find(|(group, _)| group.contains(&mode))
            .map(|(_, class)| class)
    }

    /// Whether the target names a channel, judged by its leading sigil.
    pub fn is_channel(&self, target: &str) -> bool {
        target
            .chars()
            .next()
            .map(|c| self.chantypes.contains(&c))
            .unwrap_or(false)
    }
}

/// Parses a `PREFIX` value such as `(qaohv)~&@%+` into mode/symbol pairs.
fn parse_prefix(value: &str) -> Option<Vec<(char, char)>> {
    let value = value.strip_prefix('(')?;
    let (modes, symbols) = value.split_once(')')?;
    if modes.chars().count() != symbols.chars().count() {
        return None;
    }
    Some(modes.chars().zip(symbols.chars()).collect())
}

#[cfg(test)]
mod test {
    use super::{Isupport, ModeClass};

    #[test]
    fn default_ranks() {
        let isupport = Isupport::default();
        assert_eq!(isupport.rank_of('~'), 5);
        assert_eq!(isupport.rank_of('&'), 4);
        assert_eq!(isupport.rank_of('@'), 3);
        assert_eq!(isupport.rank_of('%'), 2);
        assert_eq!(isupport.rank_of('+'), 1);
        assert_eq!(isupport.rank_of('x'), 0);
    }

    #[test]
    fn prefix_override() {
        let mut isupport = Isupport::default();
        isupport.apply_tokens(["PREFIX=(ov)@+"]);
        assert!(!isupport.is_prefix_mode('q'));
        assert_eq!(isupport.symbol_for('o'), Some('@'));
        assert_eq!(isupport.rank_of('@'), 2);
        assert_eq!(isupport.rank_of('+'), 1);
    }

    #[test]
    fn chantypes_override() {
        let mut isupport = Isupport::default();
        assert!(isupport.is_channel("+chan"));
        isupport.apply_tokens(["CHANTYPES=#"]);
        assert!(isupport.is_channel("#chan"));
        assert!(!isupport.is_channel("+chan"));
        assert!(!isupport.is_channel("nick"));
    }

    #[test]
    fn chanmode_classes() {
        let mut isupport = Isupport::default();
        assert_eq!(isupport.chanmode_class('b'), None);
        isupport.apply_tokens(["CHANMODES=beI,k,l,imnpst"]);
        assert_eq!(isupport.chanmode_class('b'), Some(ModeClass::A));
        assert_eq!(isupport.chanmode_class('k'), Some(ModeClass::B));
        assert_eq!(isupport.chanmode_class('l'), Some(ModeClass::C));
        assert_eq!(isupport.chanmode_class('i'), Some(ModeClass::D));
        assert_eq!(isupport.chanmode_class('o'), None);
    }

    #[test]
    fn malformed_tokens_ignored() {
        let mut isupport = Isupport::default();
        isupport.apply_tokens(["PREFIX=qaohv", "CHANMODES=a,b", "NETWORK=Libera.Chat"]);
        assert_eq!(isupport, Isupport::default());
    }
}
