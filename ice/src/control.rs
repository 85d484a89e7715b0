use stun::attributes::*;
use stun::message::*;
use stun::Error as StunError;

type Result<T> = std::result::Result<T, StunError>;

/// Common helper for ICE-{CONTROLLED,CONTROLLING} and attributes.
#[derive(Debug, Default, PartialEq, Eq, Copy, Clone)]
pub struct TieBreaker(pub u64);

pub(crate) const TIE_BREAKER_SIZE: usize = 8; // 64 bit

impl TieBreaker {
    /// add_to_as adds tie breaker value to m as t attribute.
    pub fn add_to_as(self, m: &mut Message, t: AttrType) -> Result<()> {
        m.add(t, &self.0.to_be_bytes());
        Ok(())
    }

    /// get_from_as decodes tie breaker value in message getting it as for t type.
    pub fn get_from_as(&mut self, m: &Message, t: AttrType) -> Result<()> {
        let v = m.get(t)?;
        if v.len() != TIE_BREAKER_SIZE {
            return Err(StunError::ErrAttributeSizeInvalid);
        }
        self.0 = u64::from_be_bytes(v[..8].try_into().unwrap());
        Ok(())
    }
}

/// AttrControlled represents ICE-CONTROLLED attribute.
#[derive(Debug, Default, PartialEq, Eq, Copy, Clone)]
pub struct AttrControlled(pub u64);

impl Setter for AttrControlled {
    /// add_to adds ICE-CONTROLLED to message.
    fn add_to(&self, m: &mut Message) -> Result<()> {
        TieBreaker(self.0).add_to_as(m, ATTR_ICE_CONTROLLED)
    }
}

impl Getter for AttrControlled {
    /// get_from decodes ICE-CONTROLLED from message.
    fn get_from(&mut self, m: &Message) -> Result<()> {
        let mut t = TieBreaker::default();
        t.get_from_as(m, ATTR_ICE_CONTROLLED)?;
        self.0 = t.0;
        Ok(())
    }
}

/// AttrControlling represents ICE-CONTROLLING attribute.
#[derive(Debug, Default, PartialEq, Eq, Copy, Clone)]
pub struct AttrControlling(pub u64);

impl Setter for AttrControlling {
    /// add_to adds ICE-CONTROLLING to message.
    fn add_to(&self, m: &mut Message) -> Result<()> {
        TieBreaker(self.0).add_to_as(m, ATTR_ICE_CONTROLLING)
    }
}

impl Getter for AttrControlling {
    /// get_from decodes ICE-CONTROLLING from message.
    fn get_from(&mut self, m: &Message) -> Result<()> {
        let mut t = TieBreaker::default();
        t.get_from_as(m, ATTR_ICE_CONTROLLING)?;
        self.0 = t.0;
        Ok(())
    }
}

/// PriorityAttr represents PRIORITY attribute.
#[derive(Debug, Default, PartialEq, Eq, Copy, Clone)]
pub struct PriorityAttr(pub u32);

const PRIORITY_SIZE: usize = 4; // 32 bit

impl Setter for PriorityAttr {
    /// add_to adds PRIORITY attribute to message.
    fn add_to(&self, m: &mut Message) -> Result<()> {
        m.add(ATTR_PRIORITY, &self.0.to_be_bytes());
        Ok(())
    }
}

impl PriorityAttr {
    /// get_from decodes PRIORITY attribute from message.
    pub fn get_from(&mut self, m: &Message) -> Result<()> {
        let v = m.get(ATTR_PRIORITY)?;
        if v.len() != PRIORITY_SIZE {
            return Err(StunError::ErrAttributeSizeInvalid);
        }
        self.0 = u32::from_be_bytes(v[..4].try_into().unwrap());
        Ok(())
    }
}

/// UseCandidateAttr represents USE-CANDIDATE attribute.
#[derive(Debug, Default, PartialEq, Eq, Copy, Clone)]
pub struct UseCandidateAttr;

impl Setter for UseCandidateAttr {
    /// add_to adds USE-CANDIDATE attribute to message.
    fn add_to(&self, m: &mut Message) -> Result<()> {
        m.add(ATTR_USE_CANDIDATE, &[]);
        Ok(())
    }
}

impl UseCandidateAttr {
    pub fn new() -> Self {
        UseCandidateAttr
    }

    /// is_set returns true if USE-CANDIDATE attribute is set.
    pub fn is_set(m: &Message) -> bool {
        m.get(ATTR_USE_CANDIDATE).is_ok()
    }
}
