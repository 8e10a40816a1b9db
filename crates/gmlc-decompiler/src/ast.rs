//! Arbre reconstruit : arène de nœuds adressés par [`NodeId`].
//!
//! Les nœuds ne se possèdent pas entre eux ; un même id peut apparaître à
//! plusieurs endroits (un `dup` empile deux fois le même nœud), et c'est
//! cette identité qui permet de reconnaître les lectures-écritures et les
//! `x++` en expression. Le nettoyage réécrit les nœuds sur place.

use gmlc_core::{ComparisonType, DataType, InstanceType, Opcode, VariableType};
use indexmap::IndexMap;
use smallvec::SmallVec;

/// Index d'un nœud dans son [`Ast`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(pub u32);

/// Instance d'un accès variable.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Instance {
    /// Instance portée par l'instruction, ou littéral entier empilé.
    Fixed(InstanceType),
    /// Expression évaluée sur la pile (`a.b`, `(5).x`, `f().x`).
    Expr(NodeId),
}

/// Accès variable reconstruit.
#[derive(Debug, Clone, PartialEq)]
pub struct VariableNode {
    /// Nom (table des variables).
    pub name: String,
    /// Instance.
    pub instance: Instance,
    /// Genre d'accès d'origine.
    pub kind: VariableType,
    /// Indices, du premier au dernier.
    pub indices: SmallVec<[NodeId; 2]>,
    /// Opcode de l'instruction source (`push`, `pushloc`, `pop`, …).
    pub opcode: Opcode,
}

impl VariableNode {
    /// Accès sans indice dont l'instance est fixée par l'instruction.
    #[must_use]
    pub fn is_simple(&self) -> bool {
        self.indices.is_empty() && matches!(self.instance, Instance::Fixed(_))
    }
}

/// Forme d'incrément que peut porter un littéral `push.e`.
///
/// `++x;` et `x++;` en instruction produisent le même bytecode : le
/// décodage ne pose [`StepMark::Prefix`] que sur la forme expression où
/// le `dup` suit l'opération.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StepMark {
    /// `pushi.e` ordinaire.
    #[default]
    None,
    /// `x++` / `x--`.
    Postfix,
    /// `++x` / `--x`.
    Prefix,
}

/// Forme d'une affectation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AssignKind {
    /// `x = v`
    Normal,
    /// `x op= v` (opcode de l'opération).
    Compound(Opcode),
    /// `++x` / `--x`
    Prefix {
        /// Incrément (sinon décrément).
        increment: bool,
    },
    /// `x++` / `x--`
    Postfix {
        /// Incrément (sinon décrément).
        increment: bool,
    },
}

/// Nœud de l'arbre.
#[derive(Debug, Clone, PartialEq)]
pub enum Node {
    /// Suite d'instructions.
    Block(Vec<NodeId>),
    /// `pushi.e`, ou `push.e` marqué (incrément, court-circuit).
    Int16 {
        /// Valeur.
        value: i16,
        /// Forme d'incrément portée.
        step: StepMark,
    },
    /// Entier 32 bits.
    Int32(i32),
    /// Entier 64 bits.
    Int64(i64),
    /// Flottant 32 bits.
    Float(f32),
    /// Flottant 64 bits.
    Double(f64),
    /// Chaîne.
    String(String),
    /// Booléen (2.3 : entier consommé comme `b`).
    Boolean(bool),
    /// Orthographe symbolique posée par la résolution de macros.
    Constant(String),
    /// Accès variable.
    Variable(VariableNode),
    /// Instance spéciale (`self`, `other`, `global`).
    TypeInst(InstanceType),
    /// Référence à une fonction.
    FunctionRef(String),
    /// Opération binaire ou comparaison.
    Binary {
        /// Opcode.
        opcode: Opcode,
        /// Genre pour un `cmp`.
        comparison: Option<ComparisonType>,
        /// Opérande gauche (second de pile).
        left: NodeId,
        /// Opérande droit (sommet).
        right: NodeId,
        /// Type du gauche (`type2`).
        left_type: DataType,
        /// Type du droit (`type1`).
        right_type: DataType,
    },
    /// `neg` / `not`.
    Unary {
        /// Opcode.
        opcode: Opcode,
        /// Opérande.
        operand: NodeId,
        /// Type de l'opération.
        ty: DataType,
    },
    /// `a && b && …` / `a || b || …` paresseux.
    ShortCircuit {
        /// `&&` (sinon `||`).
        and: bool,
        /// Opérandes dans l'ordre.
        operands: Vec<NodeId>,
    },
    /// `c ? a : b`
    Conditional {
        /// Condition.
        cond: NodeId,
        /// Valeur si vrai.
        then: NodeId,
        /// Valeur si faux.
        otherwise: NodeId,
    },
    /// Appel direct par nom.
    Call {
        /// Fonction.
        name: String,
        /// Arguments dans l'ordre source.
        args: Vec<NodeId>,
    },
    /// `callv` : fonction et instance évaluées.
    CallVar {
        /// Expression de fonction.
        function: NodeId,
        /// Instance d'appel.
        instance: NodeId,
        /// Arguments.
        args: Vec<NodeId>,
    },
    /// Affectation (instruction, ou expression pour `++x`/`x++`).
    Assign {
        /// Cible (un nœud [`Node::Variable`]).
        target: NodeId,
        /// Valeur (pour `Prefix`/`Postfix`, la cible elle-même).
        value: NodeId,
        /// Forme.
        kind: AssignKind,
        /// Déclaration `var`.
        declare: bool,
        /// Écriture `pop.i` (instance et indice dupliqués sous la valeur).
        pop_int: bool,
    },
    /// `break`
    Break,
    /// `continue`
    Continue,
    /// `exit`
    Exit,
    /// `return v`
    Return(NodeId),
    /// `throw v`
    Throw(NodeId),
    /// `if`
    If {
        /// Condition.
        cond: NodeId,
        /// Branche vraie (bloc).
        then: NodeId,
        /// Branche fausse (bloc).
        otherwise: Option<NodeId>,
        /// Branche fausse limitée à un `if` : écrite `else if`.
        else_if: bool,
    },
    /// `while` ; sans condition, `for (;;)`.
    While {
        /// Condition.
        cond: Option<NodeId>,
        /// Corps.
        body: NodeId,
        /// Un `continue` vise cette boucle.
        continue_used: bool,
    },
    /// `for`
    For {
        /// Initialisation.
        init: Option<NodeId>,
        /// Condition.
        cond: Option<NodeId>,
        /// Pas.
        step: Option<NodeId>,
        /// Corps.
        body: NodeId,
    },
    /// `do … until`
    DoUntil {
        /// Corps.
        body: NodeId,
        /// Condition de sortie.
        cond: NodeId,
    },
    /// `repeat`
    Repeat {
        /// Nombre d'itérations.
        count: NodeId,
        /// Corps.
        body: NodeId,
    },
    /// `with`
    With {
        /// Instance(s) visée(s).
        target: NodeId,
        /// Corps.
        body: NodeId,
    },
    /// `switch` ; le corps mêle étiquettes et instructions.
    Switch {
        /// Valeur testée.
        value: NodeId,
        /// Étiquettes et instructions, dans l'ordre.
        body: Vec<NodeId>,
    },
    /// `case v:`
    SwitchCase(NodeId),
    /// `default:`
    SwitchDefault,
    /// `try`
    Try {
        /// Corps.
        body: NodeId,
        /// Variable et bloc du `catch`.
        catch: Option<(String, NodeId)>,
        /// Bloc `finally`.
        finally: Option<NodeId>,
    },
    /// Exception posée sur la pile à l'entrée d'un `catch`.
    Exception,
    /// `static a = …, b = …;`
    Static(Vec<NodeId>),
    /// Fonction interne (déclaration ou expression).
    Function {
        /// Nom de la fonction enfant.
        child: String,
        /// Nombre de paramètres.
        argument_count: u16,
        /// Constructeur.
        constructor: bool,
        /// Corps.
        body: NodeId,
        /// Écrite `function nom()` en instruction.
        named: bool,
        /// Locaux lus avant toute affectation, déclarés en tête.
        preamble: Vec<String>,
    },
    /// `{ a: v, … }`
    Struct(Vec<(String, NodeId)>),
    /// `new f(…)`
    New {
        /// Constructeur.
        function: String,
        /// Arguments.
        args: Vec<NodeId>,
    },
    /// `[a, b, …]`
    ArrayLiteral(Vec<NodeId>),
}

impl Node {
    /// Nœud d'instruction (sinon d'expression).
    #[must_use]
    pub const fn is_statement(&self) -> bool {
        matches!(
            self,
            Self::Block(_)
                | Self::Break
                | Self::Continue
                | Self::Exit
                | Self::Return(_)
                | Self::Throw(_)
                | Self::If { .. }
                | Self::While { .. }
                | Self::For { .. }
                | Self::DoUntil { .. }
                | Self::Repeat { .. }
                | Self::With { .. }
                | Self::Switch { .. }
                | Self::SwitchCase(_)
                | Self::SwitchDefault
                | Self::Try { .. }
                | Self::Static(_)
        )
    }
}

/// Arène de nœuds.
#[derive(Debug, Clone, Default)]
pub struct Ast {
    nodes: Vec<Node>,
}

impl Ast {
    /// Arène vide.
    #[must_use]
    pub const fn new() -> Self {
        Self { nodes: Vec::new() }
    }

    /// Ajoute un nœud.
    pub fn add(&mut self, node: Node) -> NodeId {
        let id = NodeId(u32::try_from(self.nodes.len()).unwrap_or(u32::MAX));
        self.nodes.push(node);
        id
    }

    /// Nœud `id`.
    ///
    /// # Panics
    /// Si `id` ne vient pas de cette arène.
    #[must_use]
    pub fn get(&self, id: NodeId) -> &Node {
        &self.nodes[id.0 as usize]
    }

    /// Nœud `id`, modifiable.
    ///
    /// # Panics
    /// Si `id` ne vient pas de cette arène.
    pub fn get_mut(&mut self, id: NodeId) -> &mut Node {
        &mut self.nodes[id.0 as usize]
    }

    /// Remplace le contenu de `id` ; toutes ses occurrences suivent.
    pub fn replace(&mut self, id: NodeId, node: Node) {
        self.nodes[id.0 as usize] = node;
    }

    /// Accès variable de `id`, s'il en est un.
    #[must_use]
    pub fn variable(&self, id: NodeId) -> Option<&VariableNode> {
        match self.get(id) {
            Node::Variable(v) => Some(v),
            _ => None,
        }
    }

    /// Nombre de nœuds.
    #[must_use]
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Arène vide.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Enfants directs de `id`, dans l'ordre d'évaluation du compilateur.
    #[must_use]
    pub fn children(&self, id: NodeId) -> SmallVec<[NodeId; 4]> {
        let mut out = SmallVec::new();
        match self.get(id) {
            Node::Block(items) | Node::Static(items) | Node::ArrayLiteral(items) => out.extend(items.iter().copied()),
            Node::Variable(v) => {
                if let Instance::Expr(e) = v.instance {
                    out.push(e);
                }
                out.extend(v.indices.iter().copied());
            }
            Node::Binary { left, right, .. } => out.extend([*left, *right]),
            Node::Unary { operand, .. } => out.push(*operand),
            Node::ShortCircuit { operands, .. } => out.extend(operands.iter().copied()),
            Node::Conditional { cond, then, otherwise } => out.extend([*cond, *then, *otherwise]),
            Node::Call { args, .. } | Node::New { args, .. } => out.extend(args.iter().rev().copied()),
            Node::CallVar { function, instance, args } => {
                out.extend(args.iter().rev().copied());
                out.extend([*instance, *function]);
            }
            Node::Assign { target, value, kind, .. } => match kind {
                AssignKind::Prefix { .. } | AssignKind::Postfix { .. } => out.push(*target),
                _ => out.extend([*value, *target]),
            },
            Node::Return(v) | Node::Throw(v) | Node::SwitchCase(v) => out.push(*v),
            Node::If { cond, then, otherwise, .. } => {
                out.extend([*cond, *then]);
                out.extend(*otherwise);
            }
            Node::While { cond, body, .. } => {
                out.extend(*cond);
                out.push(*body);
            }
            Node::For { init, cond, step, body } => {
                out.extend(*init);
                out.extend(*cond);
                out.push(*body);
                out.extend(*step);
            }
            Node::DoUntil { body, cond } => out.extend([*body, *cond]),
            Node::Repeat { count: a, body: b } | Node::With { target: a, body: b } => out.extend([*a, *b]),
            Node::Switch { value, body } => {
                out.push(*value);
                out.extend(body.iter().copied());
            }
            Node::Try { body, catch, finally } => {
                out.push(*body);
                if let Some((_, c)) = catch {
                    out.push(*c);
                }
                out.extend(*finally);
            }
            Node::Function { body, .. } => out.push(*body),
            Node::Struct(fields) => out.extend(fields.iter().rev().map(|(_, v)| *v)),
            Node::Int16 { .. }
            | Node::Int32(_)
            | Node::Int64(_)
            | Node::Float(_)
            | Node::Double(_)
            | Node::String(_)
            | Node::Boolean(_)
            | Node::Constant(_)
            | Node::TypeInst(_)
            | Node::FunctionRef(_)
            | Node::Break
            | Node::Continue
            | Node::Exit
            | Node::SwitchDefault
            | Node::Exception => {}
        }
        out
    }
}

/// Sortie du décodage d'une entrée.
#[derive(Debug, Clone)]
pub struct Program {
    /// Arène.
    pub ast: Ast,
    /// Bloc racine.
    pub root: NodeId,
    /// Locaux de la racine déclarés en tête (`var a, b;`).
    pub preamble: Vec<String>,
    /// Fonctions enfants décodées, par nom.
    pub functions: IndexMap<String, NodeId>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn replace_is_seen_through_every_occurrence() {
        let mut ast = Ast::new();
        let lit = ast.add(Node::Int16 { value: 1, step: StepMark::None });
        let sum = ast.add(Node::Binary {
            opcode: Opcode::Add,
            comparison: None,
            left: lit,
            right: lit,
            left_type: DataType::Int32,
            right_type: DataType::Int32,
        });
        ast.replace(lit, Node::Boolean(true));
        assert_eq!(ast.children(sum).as_slice(), &[lit, lit]);
        assert_eq!(ast.get(lit), &Node::Boolean(true));
        assert_eq!(ast.len(), 2);
    }

    #[test]
    fn call_children_follow_push_order() {
        let mut ast = Ast::new();
        let a = ast.add(Node::Int32(1));
        let b = ast.add(Node::Int32(2));
        let call = ast.add(Node::Call { name: "f".into(), args: vec![a, b] });
        assert_eq!(ast.children(call).as_slice(), &[b, a]);
    }

    #[test]
    fn statements_are_told_apart() {
        assert!(Node::Break.is_statement());
        assert!(!Node::Exception.is_statement());
        assert!(!Node::Int32(3).is_statement());
    }
}
