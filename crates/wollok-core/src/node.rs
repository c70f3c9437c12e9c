//! The linked node tree: a tagged-variant arena addressed by [`NodeId`].
//!
//! Every node the linker produces lives in [`Environment::nodes`], indexed by its
//! `NodeId`. Parent and reference-target edges are plain ids rather than owned
//! pointers, since the linked tree is full of cycles (parent/child, module
//! inheritance, reference targets) that Rust ownership cannot express directly.
//! Only the forward "this package contains these members" edges matter for
//! ownership, and those are `Vec<NodeId>` into the same arena.

use crate::parsed::SourceMap;

/// Opaque, stable-within-one-link-run identifier for a node.
///
/// Uniqueness across a single [`Environment`] is the only guarantee; ids from two
/// different link runs are not comparable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, serde::Serialize, serde::Deserialize)]
pub struct NodeId(pub(crate) u32);

impl NodeId {
    pub(crate) fn index(self) -> usize {
        self.0 as usize
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct NodeMeta {
    pub parent: Option<NodeId>,
    pub source_map: Option<SourceMap>,
}

#[derive(Debug, Clone)]
pub struct Package {
    pub name: String,
    pub members: Vec<NodeId>,
    pub imports: Vec<Import>,
}

#[derive(Debug, Clone)]
pub struct Import {
    pub path: String,
    pub entity: Option<String>,
}

#[derive(Debug, Clone)]
pub struct Module {
    pub name: Option<String>,
    pub superclass_name: Option<String>,
    pub superclass: Option<NodeId>,
    pub mixin_names: Vec<String>,
    pub mixins: Vec<NodeId>,
    pub members: Vec<NodeId>,
    /// Arguments passed to the superclass constructor in a `Literal Singleton`; unused
    /// for `Class`/`Mixin`.
    pub supercall_args: Vec<NodeId>,
}

/// Distinguishes the three module-shaped variants, which otherwise share `Module`'s
/// payload and all participate in linearization.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModuleKind {
    Class,
    Mixin,
    Singleton,
}

#[derive(Debug, Clone)]
pub struct Method {
    pub name: String,
    pub parameters: Vec<NodeId>,
    pub variadic: bool,
    pub is_native: bool,
    /// `None` body means abstract (no implementation); dispatch to it is a runtime error.
    pub body: Option<NodeId>,
}

#[derive(Debug, Clone)]
pub struct Constructor {
    pub parameters: Vec<NodeId>,
    pub variadic: bool,
    pub delegates_to_self: bool,
    pub base_args: Vec<NodeId>,
    pub has_base_call: bool,
    pub body: NodeId,
}

#[derive(Debug, Clone)]
pub struct Field {
    pub name: String,
    pub initializer: Option<NodeId>,
    pub writable: bool,
}

#[derive(Debug, Clone)]
pub struct Variable {
    pub name: String,
    pub initializer: Option<NodeId>,
    pub writable: bool,
}

#[derive(Debug, Clone)]
pub struct Parameter {
    pub name: String,
    pub variadic: bool,
}

#[derive(Debug, Clone)]
pub struct Body {
    pub statements: Vec<NodeId>,
}

#[derive(Debug, Clone)]
pub struct Reference {
    pub name: String,
    pub target: Option<NodeId>,
}

#[derive(Debug, Clone)]
pub enum LiteralValue {
    Null,
    Bool(bool),
    Number(f64),
    String(String),
    /// An anonymous (or named) object literal; `target` is the desugared `Singleton` node.
    Singleton(NodeId),
}

#[derive(Debug, Clone)]
pub struct Send {
    pub receiver: NodeId,
    pub message: String,
    pub args: Vec<NodeId>,
}

#[derive(Debug, Clone)]
pub struct SuperCall {
    pub args: Vec<NodeId>,
}

#[derive(Debug, Clone)]
pub struct New {
    pub instantiated_name: String,
    pub instantiated: Option<NodeId>,
    pub args: Vec<NodeId>,
    pub named_args: Vec<NodeId>,
}

#[derive(Debug, Clone)]
pub struct Assignment {
    pub reference: NodeId,
    pub value: NodeId,
}

#[derive(Debug, Clone)]
pub struct Return {
    pub value: Option<NodeId>,
}

#[derive(Debug, Clone)]
pub struct If {
    pub condition: NodeId,
    pub then_body: NodeId,
    pub else_body: Option<NodeId>,
}

#[derive(Debug, Clone)]
pub struct Try {
    pub body: NodeId,
    pub catches: Vec<NodeId>,
    pub always: Option<NodeId>,
}

#[derive(Debug, Clone)]
pub struct Catch {
    pub parameter: NodeId,
    pub exception_type_name: String,
    pub exception_type: Option<NodeId>,
    pub body: NodeId,
}

#[derive(Debug, Clone)]
pub struct Throw {
    pub exception: NodeId,
}

#[derive(Debug, Clone)]
pub struct Program {
    pub name: String,
    pub body: NodeId,
}

#[derive(Debug, Clone)]
pub struct Test {
    pub name: String,
    pub body: NodeId,
}

#[derive(Debug, Clone)]
pub struct Describe {
    pub name: String,
    pub members: Vec<NodeId>,
}

#[derive(Debug, Clone)]
pub struct ParameterizedType {
    pub name: String,
    pub target: Option<NodeId>,
    pub args: Vec<NodeId>,
}

#[derive(Debug, Clone)]
pub struct NamedArgument {
    pub name: String,
    pub value: NodeId,
}

/// The tagged-variant node. Every variant from the specification's data model is here
/// except `Closure`, which is pure sugar and is desugared into a `Module` (kind
/// `Singleton`) plus an `apply` `Method` while converting the parsed tree.
#[derive(Debug, Clone)]
pub enum Node {
    Package(Package),
    Module(ModuleKind, Module),
    Method(Method),
    Constructor(Constructor),
    Field(Field),
    Variable(Variable),
    Parameter(Parameter),
    Body(Body),
    Reference(Reference),
    Literal(LiteralValue),
    Send(Send),
    Super(SuperCall),
    SelfExpr,
    New(New),
    Assignment(Assignment),
    Return(Return),
    If(If),
    Try(Try),
    Catch(Catch),
    Throw(Throw),
    Program(Program),
    Test(Test),
    Describe(Describe),
    ParameterizedType(ParameterizedType),
    NamedArgument(NamedArgument),
}

impl Node {
    /// The simple declared name of this node, if it has one as a bindable entity
    /// (used by scope lookup and by package/module merge).
    pub fn simple_name(&self) -> Option<&str> {
        match self {
            Self::Package(p) => Some(&p.name),
            Self::Module(_, m) => m.name.as_deref(),
            Self::Method(m) => Some(&m.name),
            Self::Field(f) => Some(&f.name),
            Self::Variable(v) => Some(&v.name),
            Self::Parameter(p) => Some(&p.name),
            Self::Program(p) => Some(&p.name),
            Self::Test(t) => Some(&t.name),
            Self::Describe(d) => Some(&d.name),
            _ => None,
        }
    }

    /// A coarse "kind" tag used by merge to decide whether two same-named siblings are
    /// actually the same declaration (and so should merge/replace) or a `MergeConflict`.
    pub fn kind_tag(&self) -> &'static str {
        match self {
            Self::Package(_) => "package",
            Self::Module(ModuleKind::Class, _) => "class",
            Self::Module(ModuleKind::Mixin, _) => "mixin",
            Self::Module(ModuleKind::Singleton, _) => "singleton",
            Self::Method(_) => "method",
            Self::Constructor(_) => "constructor",
            Self::Field(_) => "field",
            Self::Variable(_) => "variable",
            Self::Parameter(_) => "parameter",
            Self::Body(_) => "body",
            Self::Reference(_) => "reference",
            Self::Literal(_) => "literal",
            Self::Send(_) => "send",
            Self::Super(_) => "super",
            Self::SelfExpr => "self",
            Self::New(_) => "new",
            Self::Assignment(_) => "assignment",
            Self::Return(_) => "return",
            Self::If(_) => "if",
            Self::Try(_) => "try",
            Self::Catch(_) => "catch",
            Self::Throw(_) => "throw",
            Self::Program(_) => "program",
            Self::Test(_) => "test",
            Self::Describe(_) => "describe",
            Self::ParameterizedType(_) => "parameterized_type",
            Self::NamedArgument(_) => "named_argument",
        }
    }
}

/// The root linked tree: every user package plus the standard-library root, addressed
/// by [`NodeId`].
///
/// Invariant: every [`Reference`] inside a linked `Environment` either has
/// `target: Some(id)` for an `id` present in `nodes`, or linking failed before
/// producing this `Environment`.
#[derive(Debug, Clone)]
pub struct Environment {
    pub(crate) nodes: Vec<Node>,
    pub(crate) meta: Vec<NodeMeta>,
    pub root_package: NodeId,
}

impl Environment {
    pub fn node(&self, id: NodeId) -> &Node {
        &self.nodes[id.index()]
    }

    pub fn node_mut(&mut self, id: NodeId) -> &mut Node {
        &mut self.nodes[id.index()]
    }

    pub fn parent(&self, id: NodeId) -> Option<NodeId> {
        self.meta[id.index()].parent
    }

    pub fn source_map(&self, id: NodeId) -> Option<SourceMap> {
        self.meta[id.index()].source_map
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    pub fn ids(&self) -> impl Iterator<Item = NodeId> + '_ {
        (0..self.nodes.len() as u32).map(NodeId)
    }

    /// Declared members of a `Module` or `Package`, used by both scope lookup and the
    /// compiler; empty for every other node kind.
    pub fn members_of(&self, id: NodeId) -> &[NodeId] {
        match self.node(id) {
            Node::Package(p) => &p.members,
            Node::Module(_, m) => &m.members,
            Node::Describe(d) => &d.members,
            _ => &[],
        }
    }

    /// Fully-qualified dotted name of a `Module` or package-level declaration, built by
    /// walking the parent chain up to (but not including) the environment root. Used
    /// both to load a module/global by name and, for natives, to key their dispatch
    /// table entry.
    pub fn fqn_of(&self, id: NodeId) -> String {
        let mut parts = Vec::new();
        if let Some(name) = self.node(id).simple_name() {
            parts.push(name.to_owned());
        }
        let mut current = self.parent(id);
        while let Some(pid) = current {
            if pid == self.root_package {
                break;
            }
            if let Some(name) = self.node(pid).simple_name() {
                if !name.is_empty() {
                    parts.push(name.to_owned());
                }
            }
            current = self.parent(pid);
        }
        parts.reverse();
        parts.join(".")
    }
}
