use std::fmt;

use super::cfg::Slot;
use super::signature::SignatureParser;

/// A value read by an instruction, optionally with the front end's type fact for it.
#[derive(Debug, Clone, Hash, Eq, PartialEq, Serialize, Deserialize)]
pub struct Operand {
    pub slot: Slot,
    #[serde(default)]
    pub ty: Option<String>,
}

impl Operand {
    pub fn new(slot: Slot) -> Self {
        Self { slot, ty: None }
    }

    pub fn typed(slot: Slot, ty: impl Into<String>) -> Self {
        Self { slot, ty: Some(ty.into()) }
    }
}

#[derive(Debug, Copy, Clone, Hash, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InvokeKind {
    Virtual,
    Interface,
    Special,
    Static,
}

#[derive(Debug, Clone, Hash, Eq, PartialEq, Serialize, Deserialize)]
pub struct Invoke {
    pub kind: InvokeKind,
    pub class: String,
    pub name: String,
    pub signature: String,
    #[serde(default)]
    pub receiver: Option<Operand>,
    #[serde(default)]
    pub args: Vec<Operand>,
    #[serde(default)]
    pub dest: Option<Slot>,
}

impl Invoke {
    pub fn receiver_type(&self) -> &str {
        self.receiver
            .as_ref()
            .and_then(|receiver| receiver.ty.as_deref())
            .unwrap_or(&self.class)
    }

    pub fn method_name(&self) -> &str {
        &self.name
    }

    pub fn signature(&self) -> &str {
        &self.signature
    }

    pub fn is_static(&self) -> bool {
        self.kind == InvokeKind::Static
    }

    pub fn is_constructor(&self) -> bool {
        self.name == "<init>"
    }

    /// Type of the `index`-th argument: the front end's fact if any, else the declared one.
    pub fn arg_type(&self, index: usize) -> Option<String> {
        let operand = self.args.get(index)?;
        operand
            .ty
            .clone()
            .or_else(|| SignatureParser::new(&self.signature).parameter_types().into_iter().nth(index))
    }

    pub fn return_type(&self) -> Option<String> {
        SignatureParser::new(&self.signature).return_type()
    }
}

#[derive(Debug, Clone, Hash, Eq, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Instruction {
    New {
        class: String,
        dest: Slot,
    },
    Invoke(Invoke),
    GetField {
        class: String,
        field: String,
        ty: String,
        #[serde(default)]
        is_static: bool,
        #[serde(default)]
        object: Option<Slot>,
        dest: Slot,
    },
    PutField {
        class: String,
        field: String,
        ty: String,
        #[serde(default)]
        is_static: bool,
        #[serde(default)]
        object: Option<Slot>,
        value: Operand,
    },
    Move {
        dest: Slot,
        src: Slot,
    },
    ConstNull {
        dest: Slot,
    },
    /// IFNULL, or IFNONNULL when `negated`.
    IfNull {
        value: Operand,
        #[serde(default)]
        negated: bool,
    },
    /// IF_ACMPEQ, or IF_ACMPNE when `negated`.
    IfRefCmp {
        left: Operand,
        right: Operand,
        #[serde(default)]
        negated: bool,
    },
    Branch,
    Return {
        #[serde(default)]
        value: Option<Operand>,
    },
    Throw {
        value: Operand,
    },
    Nop,
}

impl Instruction {
    pub fn new_object(class: impl Into<String>, dest: Slot) -> Self {
        Instruction::New { class: class.into(), dest }
    }

    pub fn construct(class: impl Into<String>, signature: impl Into<String>, receiver: Slot, args: Vec<Operand>) -> Self {
        let class = class.into();
        Instruction::Invoke(Invoke {
            kind: InvokeKind::Special,
            receiver: Some(Operand::typed(receiver, class.clone())),
            class,
            name: "<init>".to_string(),
            signature: signature.into(),
            args,
            dest: None,
        })
    }

    pub fn call_virtual(
        class: impl Into<String>,
        name: impl Into<String>,
        signature: impl Into<String>,
        receiver: Slot,
        args: Vec<Operand>,
        dest: Option<Slot>,
    ) -> Self {
        let class = class.into();
        Instruction::Invoke(Invoke {
            kind: InvokeKind::Virtual,
            receiver: Some(Operand::typed(receiver, class.clone())),
            class,
            name: name.into(),
            signature: signature.into(),
            args,
            dest,
        })
    }

    pub fn call_interface(
        class: impl Into<String>,
        name: impl Into<String>,
        signature: impl Into<String>,
        receiver: Slot,
        args: Vec<Operand>,
        dest: Option<Slot>,
    ) -> Self {
        match Self::call_virtual(class, name, signature, receiver, args, dest) {
            Instruction::Invoke(mut invoke) => {
                invoke.kind = InvokeKind::Interface;
                Instruction::Invoke(invoke)
            }
            other => other,
        }
    }

    pub fn call_static(
        class: impl Into<String>,
        name: impl Into<String>,
        signature: impl Into<String>,
        args: Vec<Operand>,
        dest: Option<Slot>,
    ) -> Self {
        Instruction::Invoke(Invoke {
            kind: InvokeKind::Static,
            class: class.into(),
            name: name.into(),
            signature: signature.into(),
            receiver: None,
            args,
            dest,
        })
    }

    pub fn get_field(class: impl Into<String>, field: impl Into<String>, ty: impl Into<String>, object: Slot, dest: Slot) -> Self {
        Instruction::GetField {
            class: class.into(),
            field: field.into(),
            ty: ty.into(),
            is_static: false,
            object: Some(object),
            dest,
        }
    }

    pub fn get_static(class: impl Into<String>, field: impl Into<String>, ty: impl Into<String>, dest: Slot) -> Self {
        Instruction::GetField {
            class: class.into(),
            field: field.into(),
            ty: ty.into(),
            is_static: true,
            object: None,
            dest,
        }
    }

    pub fn put_field(class: impl Into<String>, field: impl Into<String>, ty: impl Into<String>, object: Slot, value: Slot) -> Self {
        let ty = ty.into();
        Instruction::PutField {
            class: class.into(),
            field: field.into(),
            value: Operand::typed(value, ty.clone()),
            ty,
            is_static: false,
            object: Some(object),
        }
    }

    pub fn ret(value: Option<Operand>) -> Self {
        Instruction::Return { value }
    }

    pub fn as_invoke(&self) -> Option<&Invoke> {
        match self {
            Instruction::Invoke(invoke) => Some(invoke),
            _ => None,
        }
    }

    pub fn is_return(&self) -> bool {
        matches!(self, Instruction::Return { .. })
    }

    /// The slot this instruction writes, if any.
    pub fn def(&self) -> Option<Slot> {
        match self {
            Instruction::New { dest, .. }
            | Instruction::GetField { dest, .. }
            | Instruction::Move { dest, .. }
            | Instruction::ConstNull { dest } => Some(*dest),
            Instruction::Invoke(invoke) => invoke.dest,
            _ => None,
        }
    }
}

impl fmt::Display for Instruction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Instruction::New { class, dest } => write!(f, "_{} = new {}", dest, class),
            Instruction::Invoke(invoke) => {
                if let Some(dest) = invoke.dest {
                    write!(f, "_{} = ", dest)?;
                }
                write!(f, "{:?} {}.{}{}", invoke.kind, invoke.class, invoke.name, invoke.signature)?;
                if let Some(receiver) = &invoke.receiver {
                    write!(f, " on _{}", receiver.slot)?;
                }
                let args: Vec<String> = invoke.args.iter().map(|arg| format!("_{}", arg.slot)).collect();
                write!(f, " ({})", args.join(", "))
            }
            Instruction::GetField { class, field, dest, .. } => write!(f, "_{} = {}.{}", dest, class, field),
            Instruction::PutField { class, field, value, .. } => write!(f, "{}.{} = _{}", class, field, value.slot),
            Instruction::Move { dest, src } => write!(f, "_{} = _{}", dest, src),
            Instruction::ConstNull { dest } => write!(f, "_{} = null", dest),
            Instruction::IfNull { value, negated } => {
                write!(f, "{} _{}", if *negated { "ifnonnull" } else { "ifnull" }, value.slot)
            }
            Instruction::IfRefCmp { left, right, negated } => {
                write!(f, "{} _{} _{}", if *negated { "if_acmpne" } else { "if_acmpeq" }, left.slot, right.slot)
            }
            Instruction::Branch => write!(f, "branch"),
            Instruction::Return { value: Some(value) } => write!(f, "return _{}", value.slot),
            Instruction::Return { value: None } => write!(f, "return"),
            Instruction::Throw { value } => write!(f, "throw _{}", value.slot),
            Instruction::Nop => write!(f, "nop"),
        }
    }
}
