use std::borrow::Cow;
use std::fmt::{Debug, Display, Formatter};

use serde::de::DeserializeOwned;
use serde::Serialize;


/// Identifies a message's exact type, both locally and on the wire. Handlers and routings are
///  registered per [TypeTag], and dispatch looks up the tag a package carries - there is no
///  matching on 'compatible' or 'related' types.
#[derive(Clone, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct TypeTag(Cow<'static, str>);

impl TypeTag {
    pub fn of<T: ?Sized>() -> TypeTag {
        TypeTag(Cow::Borrowed(std::any::type_name::<T>()))
    }

    /// for tags that were received over the wire
    pub fn from_wire(name: String) -> TypeTag {
        TypeTag(Cow::Owned(name))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Debug for TypeTag {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "TypeTag({})", self.0)
    }
}

impl Display for TypeTag {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}


/// Anything that can cross the wire as a request, response or topic.
///
/// This is implemented for every type that is serde (de)serializable and can be sent between
///  threads, so there is nothing to implement - but registering a handler or routing for a type
///  that can not be (de)serialized is rejected by the compiler.
pub trait Message: Serialize + DeserializeOwned + Debug + Send + Sync + 'static {
    fn type_tag() -> TypeTag where Self: Sized {
        TypeTag::of::<Self>()
    }
}

impl <T> Message for T where T: Serialize + DeserializeOwned + Debug + Send + Sync + 'static {}
