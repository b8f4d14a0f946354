use serde::{Deserialize, Serialize};

/// Organisational roles that can be named as the required approver of a level.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    SuperAdmin,
    Admin,
    DeptManager,
    FinanceDirector,
    HrManager,
    ProjectManager,
    ComplianceOfficer,
    Employee,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Module {
    Approvals,
    Finance,
    Hr,
    Assets,
    Projects,
    Compliance,
    Payroll,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Action {
    View,
    Create,
    Approve,
    Admin,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Permission {
    pub module: Module,
    pub action: Action,
}

const fn permit(module: Module, action: Action) -> Permission {
    Permission { module, action }
}

const SUPER_ADMIN_PERMISSIONS: &[Permission] = &[
    permit(Module::Approvals, Action::Admin),
    permit(Module::Finance, Action::Admin),
    permit(Module::Hr, Action::Admin),
    permit(Module::Assets, Action::Admin),
    permit(Module::Projects, Action::Admin),
    permit(Module::Compliance, Action::Admin),
    permit(Module::Payroll, Action::Admin),
];

const ADMIN_PERMISSIONS: &[Permission] = &[
    permit(Module::Approvals, Action::Approve),
    permit(Module::Finance, Action::View),
    permit(Module::Hr, Action::Admin),
    permit(Module::Assets, Action::Admin),
    permit(Module::Projects, Action::Admin),
    permit(Module::Compliance, Action::View),
];

const DEPT_MANAGER_PERMISSIONS: &[Permission] = &[
    permit(Module::Approvals, Action::Approve),
    permit(Module::Hr, Action::View),
    permit(Module::Assets, Action::Create),
    permit(Module::Projects, Action::Approve),
];

const FINANCE_DIRECTOR_PERMISSIONS: &[Permission] = &[
    permit(Module::Approvals, Action::Approve),
    permit(Module::Finance, Action::Admin),
    permit(Module::Payroll, Action::Approve),
    permit(Module::Assets, Action::View),
];

const HR_MANAGER_PERMISSIONS: &[Permission] = &[
    permit(Module::Approvals, Action::Approve),
    permit(Module::Hr, Action::Admin),
    permit(Module::Payroll, Action::View),
];

const PROJECT_MANAGER_PERMISSIONS: &[Permission] = &[
    permit(Module::Approvals, Action::Approve),
    permit(Module::Projects, Action::Admin),
    permit(Module::Assets, Action::View),
];

const COMPLIANCE_OFFICER_PERMISSIONS: &[Permission] = &[
    permit(Module::Approvals, Action::Approve),
    permit(Module::Compliance, Action::Admin),
    permit(Module::Finance, Action::View),
];

const EMPLOYEE_PERMISSIONS: &[Permission] = &[
    permit(Module::Approvals, Action::Create),
    permit(Module::Hr, Action::View),
    permit(Module::Projects, Action::View),
];

impl Role {
    pub const ALL: [Role; 8] = [
        Role::SuperAdmin,
        Role::Admin,
        Role::DeptManager,
        Role::FinanceDirector,
        Role::HrManager,
        Role::ProjectManager,
        Role::ComplianceOfficer,
        Role::Employee,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::SuperAdmin => "super_admin",
            Self::Admin => "admin",
            Self::DeptManager => "dept_manager",
            Self::FinanceDirector => "finance_director",
            Self::HrManager => "hr_manager",
            Self::ProjectManager => "project_manager",
            Self::ComplianceOfficer => "compliance_officer",
            Self::Employee => "employee",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        let key = value.trim().to_ascii_lowercase();
        Self::ALL.into_iter().find(|role| role.as_str() == key)
    }

    /// Default module permissions granted to the role before any per-tenant override.
    pub fn default_permissions(&self) -> &'static [Permission] {
        match self {
            Self::SuperAdmin => SUPER_ADMIN_PERMISSIONS,
            Self::Admin => ADMIN_PERMISSIONS,
            Self::DeptManager => DEPT_MANAGER_PERMISSIONS,
            Self::FinanceDirector => FINANCE_DIRECTOR_PERMISSIONS,
            Self::HrManager => HR_MANAGER_PERMISSIONS,
            Self::ProjectManager => PROJECT_MANAGER_PERMISSIONS,
            Self::ComplianceOfficer => COMPLIANCE_OFFICER_PERMISSIONS,
            Self::Employee => EMPLOYEE_PERMISSIONS,
        }
    }

    /// `Admin` on a module implies every other action on it; `Approve` implies `View`.
    pub fn can(&self, module: Module, action: Action) -> bool {
        self.default_permissions().iter().filter(|granted| granted.module == module).any(
            |granted| {
                granted.action == action
                    || granted.action == Action::Admin
                    || (granted.action == Action::Approve && action == Action::View)
            },
        )
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::{Action, Module, Role};

    #[test]
    fn parse_accepts_wire_names_case_insensitively() {
        assert_eq!(Role::parse("dept_manager"), Some(Role::DeptManager));
        assert_eq!(Role::parse(" Finance_Director "), Some(Role::FinanceDirector));
        assert_eq!(Role::parse("intern"), None);
    }

    #[test]
    fn every_role_round_trips_through_its_wire_name() {
        for role in Role::ALL {
            assert_eq!(Role::parse(role.as_str()), Some(role));
        }
    }

    #[test]
    fn serde_uses_snake_case_wire_names() {
        let encoded = serde_json::to_string(&Role::ComplianceOfficer).expect("serialize");
        assert_eq!(encoded, "\"compliance_officer\"");
    }

    #[test]
    fn admin_grant_implies_every_action_on_module() {
        assert!(Role::SuperAdmin.can(Module::Payroll, Action::Approve));
        assert!(Role::FinanceDirector.can(Module::Finance, Action::Create));
    }

    #[test]
    fn approve_grant_implies_view_but_not_create() {
        assert!(Role::DeptManager.can(Module::Approvals, Action::View));
        assert!(!Role::DeptManager.can(Module::Approvals, Action::Create));
    }

    #[test]
    fn employees_can_submit_but_not_approve() {
        assert!(Role::Employee.can(Module::Approvals, Action::Create));
        assert!(!Role::Employee.can(Module::Approvals, Action::Approve));
        assert!(!Role::Employee.can(Module::Payroll, Action::View));
    }
}
